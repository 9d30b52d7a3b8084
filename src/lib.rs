//! # asemu - Layered internet topology emulator
//!
//! This library builds emulations of multi-AS internet topologies
//! (autonomous systems, internet exchanges, BGP/OSPF routing and overlaid
//! services such as a private Ethereum network) and compiles them into
//! container infrastructure.
//!
//! ## Overview
//!
//! An emulation is assembled from independently-constructed **layers**.
//! Each layer has a name and declares the layers it depends on; rendering
//! runs every layer exactly once in dependency order against a shared
//! registry of ASes, exchanges, networks and nodes. Service layers declare
//! **virtual nodes** that bindings place onto concrete nodes. The rendered
//! registry is then compiled into one artifact directory per node plus a
//! compose manifest.
//!
//! ## Architecture
//!
//! - `registry`: AS / exchange / network / node data and its invariants
//! - `ip`: prefixes, address pools and the default address plan
//! - `layer`: the `Layer` trait, dependency resolution, routing layers
//! - `binding`: filters and binding resolution
//! - `service`: service capability and the Ethereum service
//! - `emulator`: composition root (install, bind, render, merge, compile)
//! - `makers`: topology construction helpers
//! - `compiler`: Docker target and state directories
//! - `config`, `config_loader`: YAML scenarios
//! - `utils`: small shared helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use asemu::compiler::{CompileOptions, Docker};
//! use asemu::layer::{Base, Ebgp, Ibgp, Ospf, Routing};
//! use asemu::makers::make_stub_as;
//! use asemu::Emulator;
//! use std::path::Path;
//!
//! let mut emu = Emulator::new();
//! emu.registry_mut()?.create_internet_exchange(100)?;
//! for asn in [99, 100, 101] {
//!     make_stub_as(&mut emu, asn, 100, 2)?;
//! }
//! let mut ebgp = Ebgp::new();
//! ebgp.add_rs_peers(100, &[99, 100, 101]);
//!
//! emu.add_layer(Base)?;
//! emu.add_layer(Routing)?;
//! emu.add_layer(ebgp)?;
//! emu.add_layer(Ibgp::new())?;
//! emu.add_layer(Ospf::new())?;
//!
//! emu.render()?;
//! emu.compile(&Docker::default(), Path::new("./output"), CompileOptions::default())?;
//! # Ok::<(), asemu::EmuError>(())
//! ```

pub mod binding;
pub mod compiler;
pub mod config;
pub mod config_loader;
pub mod emulator;
pub mod error;
pub mod ip;
pub mod layer;
pub mod makers;
pub mod registry;
pub mod service;
pub mod utils;

pub use binding::{Binding, BindingKind, Filter};
pub use emulator::{Emulator, RenderState};
pub use error::{EmuError, Result};
pub use layer::Layer;
pub use registry::Registry;
