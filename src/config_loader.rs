//! Scenario loading: YAML file -> validated [`Config`] -> [`Emulator`].

use crate::binding::{Binding, Filter};
use crate::compiler::{CompileOptions, Docker};
use crate::config::{BindingConfig, Config, LayerKind};
use crate::emulator::Emulator;
use crate::layer::{Base, Ebgp, Ibgp, Ospf, Routing};
use crate::makers::{make_stub_as, make_transit_as};
use crate::service::EthereumService;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Load and validate a scenario file.
///
/// Runs before the logger is configured, so it does not log.
pub fn load_config(config_path: &Path) -> Result<Config> {
    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;
    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    config.validate()?;
    Ok(config)
}

fn binding_filter(binding: &BindingConfig) -> Result<Filter> {
    let mut filters = Vec::new();
    if let Some(asn) = binding.asn {
        filters.push(Filter::asn(asn));
    }
    if let Some(name) = &binding.node_name {
        filters.push(Filter::node_name(name.as_str()));
    }
    if let Some(pattern) = &binding.name_pattern {
        filters.push(Filter::name_pattern(pattern)?);
    }
    if let Some(role) = binding.role {
        filters.push(Filter::role(role));
    }
    Ok(match filters.len() {
        1 => filters.remove(0),
        _ => Filter::All(filters),
    })
}

/// Build an unrendered emulator from a validated scenario
pub fn build_emulator(config: &Config) -> Result<Emulator> {
    let mut emu = Emulator::new();

    {
        let registry = emu.registry_mut()?;
        for ix in &config.exchanges {
            let exchange = registry.create_internet_exchange(ix.id)?;
            if let Some(name) = &ix.display_name {
                exchange.peering_lan_mut().set_display_name(name.as_str());
            }
        }
    }
    for stub in &config.stub_ases {
        make_stub_as(&mut emu, stub.asn, stub.exchange, stub.hosts)?;
    }
    for transit in &config.transit_ases {
        make_transit_as(&mut emu, transit.asn, &transit.exchanges, &transit.links)?;
    }
    info!(
        "Built topology: {} exchanges, {} autonomous systems",
        config.exchanges.len(),
        config.stub_ases.len() + config.transit_ases.len()
    );

    for layer in &config.layers {
        match layer {
            LayerKind::Base => emu.add_layer(Base)?,
            LayerKind::Routing => emu.add_layer(Routing)?,
            LayerKind::Ibgp => emu.add_layer(Ibgp::new())?,
            LayerKind::Ospf => emu.add_layer(Ospf::new())?,
            LayerKind::Ebgp => {
                let mut ebgp = Ebgp::new();
                if let Some(peerings) = &config.ebgp {
                    for peers in &peerings.rs_peers {
                        ebgp.add_rs_peers(peers.exchange, &peers.asns);
                    }
                    for p in &peerings.private_peerings {
                        ebgp.add_private_peering(p.exchange, p.a, p.b, p.relationship);
                    }
                }
                emu.add_layer(ebgp)?
            }
        };
    }

    if let Some(eth_config) = &config.ethereum {
        let mut eth = EthereumService::new(eth_config.save_state, eth_config.manual);
        eth.set_consensus(eth_config.consensus);
        if let Some(chain_id) = eth_config.chain_id {
            eth.set_chain_id(chain_id);
        }
        for server_config in &eth_config.servers {
            let server = eth.install(&server_config.name);
            server.set_boot_node(server_config.boot_node);
            if let Some(accounts) = &server_config.accounts {
                server.create_prefunded_accounts(
                    u128::from(accounts.balance),
                    accounts.count,
                    accounts.password.as_str(),
                    accounts.keystore_dir.clone(),
                );
            }
            if server_config.unlock_accounts {
                server.unlock_accounts();
            }
            if server_config.start_miner {
                server.start_miner();
            }
            if server_config.external_connection {
                server.enable_external_connection();
            }
        }
        emu.add_layer(eth)?;

        for server_config in &eth_config.servers {
            let vnode = emu.virtual_node_mut(&server_config.name)?;
            if let Some(name) = &server_config.display_name {
                vnode.set_display_name(name.as_str());
            }
            for port in &server_config.port_forwarding {
                vnode.add_port_forwarding(port.host, port.container);
            }
        }
    }

    for binding in &config.bindings {
        let filter = binding_filter(binding)?;
        let binding = if binding.broadcast {
            Binding::broadcast(binding.virtual_node.as_str(), filter)
        } else {
            Binding::new(binding.virtual_node.as_str(), filter)
        };
        emu.add_binding(binding)?;
    }

    Ok(emu)
}

/// Compiler selected by the scenario
pub fn compiler(config: &Config) -> Docker {
    match &config.general.base_image {
        Some(image) => Docker::new(image.as_str()),
        None => Docker::default(),
    }
}

/// Compile options from the scenario, with an optional CLI override flag
pub fn compile_options(config: &Config, force_override: bool) -> CompileOptions {
    CompileOptions {
        override_existing: config.general.override_existing || force_override,
        state_policy: config.general.state_policy,
    }
}
