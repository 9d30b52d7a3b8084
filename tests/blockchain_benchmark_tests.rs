//! 200 Ethereum virtual nodes on 201 stub ASes behind one exchange.
//!
//! The topology and the service are built as two emulators and merged,
//! the way a scenario author composes independent pieces.

use asemu::compiler::{CompileOptions, Docker};
use asemu::layer::{Base, Ebgp, Ibgp, Ospf, Routing};
use asemu::makers::make_stub_as;
use asemu::registry::NodeRef;
use asemu::service::ethereum::state_subpath;
use asemu::service::EthereumService;
use asemu::{Binding, Emulator, Filter, RenderState};
use tempfile::TempDir;

const EXCHANGE: u32 = 20;
const FIRST_ASN: u32 = 30;
const LAST_ASN: u32 = 230;
const ETH_NODES: u32 = 200;

fn topology() -> Emulator {
    let mut emu = Emulator::new();
    emu.registry_mut()
        .unwrap()
        .create_internet_exchange(EXCHANGE)
        .unwrap();

    let asns: Vec<u32> = (FIRST_ASN..=LAST_ASN).collect();
    for asn in &asns {
        make_stub_as(&mut emu, *asn, EXCHANGE, 1).unwrap();
    }
    let mut ebgp = Ebgp::new();
    ebgp.add_rs_peers(EXCHANGE, &asns);

    emu.add_layer(Base).unwrap();
    emu.add_layer(Routing).unwrap();
    emu.add_layer(ebgp).unwrap();
    emu.add_layer(Ibgp::new()).unwrap();
    emu.add_layer(Ospf::new()).unwrap();
    emu
}

fn blockchain() -> Emulator {
    let mut eth = EthereumService::new(true, false);
    for i in 1..=ETH_NODES {
        let server = eth.install(&format!("eth{}", i));
        if i % 3 == 0 {
            server.set_boot_node(true);
        } else {
            server.start_miner();
        }
    }

    let mut emu = Emulator::new();
    emu.add_layer(eth).unwrap();
    for i in 1..=ETH_NODES {
        let vnode = emu.virtual_node_mut(&format!("eth{}", i)).unwrap();
        vnode
            .set_display_name(format!("Ethereum-poa-{}", i))
            .add_port_forwarding((8544 + i - 1) as u16, 8549);
    }
    for i in 1..=ETH_NODES {
        emu.add_binding(Binding::new(
            format!("eth{}", i),
            Filter::asn(FIRST_ASN + i).and(Filter::node_name("host0")),
        ))
        .unwrap();
    }
    emu
}

#[test]
fn test_service_roles() {
    let emu = blockchain();
    let eth = emu
        .layer_as::<EthereumService>("EthereumService")
        .unwrap();
    assert_eq!(eth.servers().len(), 200);
    assert_eq!(eth.boot_nodes().count(), 66);
    assert_eq!(eth.sealers().count(), 134);
}

#[test]
fn test_merged_benchmark_renders_and_compiles() {
    let mut emu = topology().merge(&blockchain()).unwrap();
    assert_eq!(emu.registry().asns().len(), 201);

    emu.render().unwrap();
    assert_eq!(emu.state(), RenderState::Rendered);
    assert_eq!(
        emu.applied_order(),
        &["Base", "Routing", "Ebgp", "Ibgp", "Ospf", "EthereumService"]
    );

    let registry = emu.registry();
    let unused = registry.node(&NodeRef::as_node(FIRST_ASN, "host0")).unwrap();
    assert!(unused.virtual_nodes().is_empty());

    for i in 1..=ETH_NODES {
        let vnode = format!("eth{}", i);
        let host = NodeRef::as_node(FIRST_ASN + i, "host0");
        assert_eq!(emu.bound_nodes()[&vnode], vec![host.clone()]);

        let node = registry.node(&host).unwrap();
        assert!(node.virtual_nodes().contains_key(&vnode));
        assert_eq!(node.display_name(), Some(format!("Ethereum-poa-{}", i).as_str()));
        assert_eq!(node.ports()[0].host, (8544 + i - 1) as u16);
        assert_eq!(node.volumes()[0].host_subpath, state_subpath(&vnode));
    }

    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("output");
    emu.compile(&Docker::default(), &output, CompileOptions::default())
        .unwrap();

    // 201 routers, 201 hosts and the route server
    let node_dirs = std::fs::read_dir(&output)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("as") || name.starts_with("ix")
        })
        .count();
    assert_eq!(node_dirs, 403);
    for i in 1..=ETH_NODES {
        assert!(output.join(state_subpath(&format!("eth{}", i))).is_dir());
    }
}

#[test]
fn test_unbound_virtual_node_fails_render() {
    let mut eth = EthereumService::new(false, false);
    eth.install("eth1");
    eth.install("eth2");
    let mut service = Emulator::new();
    service.add_layer(eth).unwrap();
    service
        .add_binding(Binding::new("eth1", Filter::asn(31).and(Filter::node_name("host0"))))
        .unwrap();

    let mut emu = topology().merge(&service).unwrap();
    let err = emu.render().unwrap_err();
    assert!(matches!(
        err,
        asemu::EmuError::BindingUnsatisfied { ref virtual_node, .. } if virtual_node == "eth2"
    ));
    assert_eq!(emu.state(), RenderState::Failed);
}
