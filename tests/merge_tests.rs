use asemu::error::Conflict;
use asemu::layer::{Base, Ebgp, Ibgp, Routing};
use asemu::makers::make_stub_as;
use asemu::{Binding, EmuError, Emulator, Filter};

/// One exchange with `asns` attached and peering through its route server.
fn piece(exchange: u32, asns: &[u32]) -> Emulator {
    let mut emu = Emulator::new();
    emu.registry_mut()
        .unwrap()
        .create_internet_exchange(exchange)
        .unwrap();
    for asn in asns {
        make_stub_as(&mut emu, *asn, exchange, 1).unwrap();
    }
    let mut ebgp = Ebgp::new();
    ebgp.add_rs_peers(exchange, asns);
    emu.add_layer(ebgp).unwrap();
    emu
}

#[test]
fn test_merge_is_associative() {
    let a = piece(10, &[150]);
    let b = piece(11, &[151]);
    let mut c = piece(12, &[152]);
    c.add_layer(Base).unwrap();

    let left = a.merge(&b).unwrap().merge(&c).unwrap();
    let right = a.merge(&b.merge(&c).unwrap()).unwrap();

    assert_eq!(left.registry(), right.registry());
    assert_eq!(left.layer_names(), right.layer_names());
    assert_eq!(left.layer_names(), vec!["Ebgp", "Base"]);

    let peers = |emu: &Emulator| {
        emu.layer_as::<Ebgp>("Ebgp")
            .map(|ebgp| ebgp.rs_peers().to_vec())
            .unwrap()
    };
    assert_eq!(peers(&left), peers(&right));
    assert_eq!(peers(&left), vec![(10, 150), (11, 151), (12, 152)]);
}

#[test]
fn test_merged_pieces_render_together() {
    let a = piece(10, &[150, 151]);
    let mut b = piece(11, &[152]);
    b.add_layer(Base).unwrap();
    b.add_layer(Routing).unwrap();
    b.add_layer(Ibgp::new()).unwrap();

    let mut emu = a.merge(&b).unwrap();
    emu.render().unwrap();
    assert_eq!(emu.applied_order(), &["Base", "Routing", "Ebgp", "Ibgp"]);
}

#[test]
fn test_conflicts_are_reported_together() {
    let a = piece(10, &[150]);
    let b = piece(10, &[150]);

    let err = a.merge(&b).unwrap_err();
    match err {
        EmuError::MergeConflict { conflicts } => {
            assert!(conflicts.contains(&Conflict::Asn(150)));
            assert!(conflicts.contains(&Conflict::Exchange(10)));
        }
        other => panic!("unexpected error: {}", other),
    }
    // inputs stay usable
    assert_eq!(a.registry().asns(), vec![150]);
    assert_eq!(b.registry().asns(), vec![150]);
}

#[test]
fn test_bindings_concatenate_in_order() {
    let mut a = Emulator::new();
    a.add_binding(Binding::new("web", Filter::asn(150))).unwrap();
    let mut b = Emulator::new();
    b.add_binding(Binding::broadcast("dns", Filter::asn(151))).unwrap();

    let merged = a.merge(&b).unwrap();
    let names: Vec<&str> = merged.bindings().iter().map(Binding::virtual_node).collect();
    assert_eq!(names, vec!["web", "dns"]);
}

#[test]
fn test_shared_virtual_node_metadata_conflicts() {
    let mut a = Emulator::new();
    a.virtual_node_mut("eth1").unwrap().set_display_name("left");
    let mut b = Emulator::new();
    b.virtual_node_mut("eth1").unwrap().set_display_name("right");

    let err = a.merge(&b).unwrap_err();
    assert!(matches!(
        err,
        EmuError::MergeConflict { ref conflicts } if conflicts == &[Conflict::VirtualNode("eth1".to_string())]
    ));
}
