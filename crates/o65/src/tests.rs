use super::*;

fn sample_module() -> O65Module {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0xAD, 0x00, 0x00, 0x4C, 0x03, 0x80, 0x60]);
    module.load_segment_from(SegmentId::Data, &[0x01, 0x02, 0x03]);
    module.resize(SegmentId::Bss, 0x20);
    module.resize(SegmentId::Zero, 4);
    module.segment_mut(SegmentId::Code).base = 0x8000;
    module.segment_mut(SegmentId::Data).base = 0x8007;
    module.declare_fixup(SegmentId::Code, 1, RelocKind::Word, SegmentId::Data);
    module.declare_fixup(SegmentId::Code, 4, RelocKind::Word, SegmentId::Code);
    module.declare_global(SegmentId::Code, "reset", 0x8000);
    module.declare_global(SegmentId::Data, "table", 0x8008);
    module.declare_global(SegmentId::Bss, "buffer", 0x0010);
    module.add_linkage(SegmentId::Code, LINK_IN_GROUP, 1);
    module
}

#[test]
fn o65_roundtrip_without_externs() {
    let module = sample_module();
    let bytes = encode_o65(&module).expect("encode");
    assert_eq!(&bytes[..5], O65_MAGIC);
    let decoded = decode_o65(&bytes).expect("decode");
    assert_eq!(decoded, module);
}

#[test]
fn o65_switches_to_use32_for_large_addresses() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0xEA]);
    module.segment_mut(SegmentId::Code).base = 0x01_8000;
    module.declare_global(SegmentId::Code, "far", 0x01_8000);
    let bytes = encode_o65(&module).expect("encode");
    assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]) & 0x2000, 0x2000);
    assert_eq!(decode_o65(&bytes).expect("decode"), module);
}

#[test]
fn rejects_invalid_magic() {
    let err = decode_o65(b"NES65O65").expect_err("expected magic error");
    assert!(err.to_string().contains("invalid object magic"));
}

#[test]
fn relocation_stream_skips_long_gaps() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &vec![0; 600]);
    module.declare_fixup(SegmentId::Code, 0, RelocKind::Low, SegmentId::Code);
    module.declare_fixup(SegmentId::Code, 300, RelocKind::High { low: 0x80 }, SegmentId::Code);
    module.declare_fixup(SegmentId::Code, 590, RelocKind::Seg { offset: 0x1234 }, SegmentId::Code);
    module.declare_relocation(SegmentId::Code, "ext", 597, RelocKind::Long);

    let bytes = encode_o65(&module).expect("encode");
    let decoded = decode_o65(&bytes).expect("decode");
    assert_eq!(
        decoded.segment(SegmentId::Code).relocations,
        module.segment(SegmentId::Code).relocations
    );
    assert_eq!(decoded.extern_list(), vec!["ext".to_string()]);
}

#[test]
fn rejects_corrupt_relocation_area() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0, 0]);
    module.declare_fixup(SegmentId::Code, 0, RelocKind::Word, SegmentId::Code);
    let mut bytes = encode_o65(&module).expect("encode");
    let tag = bytes
        .iter()
        .position(|b| *b == 0x82)
        .expect("word fixup tag");
    bytes[tag] = 0x87;
    let err = decode_o65(&bytes).expect_err("corrupt");
    assert!(format!("{err:#}").contains("invalid relocation area 7"));
}

#[test]
fn link_sym_adds_value_to_word_site() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0xAD, 0x05, 0x00]);
    module.declare_relocation(SegmentId::Code, "foo", 1, RelocKind::Word);
    module.link_sym("foo", 0x1234).expect("link");
    assert_eq!(module.segment(SegmentId::Code).bytes, vec![0xAD, 0x39, 0x12]);
    assert!(module.extern_list().is_empty());
    module.verify().expect("all symbols defined");
}

#[test]
fn link_sym_rejects_unknown_and_repeated_symbols() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0, 0]);
    module.declare_relocation(SegmentId::Code, "foo", 0, RelocKind::Word);
    assert_eq!(
        module.link_sym("bar", 1).expect_err("unknown"),
        SymbolError::Unknown {
            name: "bar".to_string()
        }
    );
    module.link_sym("foo", 0x10).expect("first");
    assert_eq!(
        module.link_sym("foo", 0x20).expect_err("again"),
        SymbolError::Redefined {
            name: "foo".to_string()
        }
    );
    assert_eq!(module.segment(SegmentId::Code).bytes, vec![0x10, 0x00]);
}

#[test]
fn declared_relocation_patches_known_symbol_at_once() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0, 0, 0, 0]);
    module.declare_relocation(SegmentId::Code, "foo", 0, RelocKind::Word);
    module.link_sym("foo", 0xC000).expect("link");
    module.declare_relocation(SegmentId::Code, "foo", 2, RelocKind::High { low: 0x00 });
    assert_eq!(module.segment(SegmentId::Code).bytes, vec![0x00, 0xC0, 0xC0, 0x00]);
    assert!(module.segment(SegmentId::Code).relocations.len() == 1);
}

#[test]
fn locate_carries_low_bits_into_high_and_seg_sites() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0x12, 0x01, 0xFF, 0x00, 0x00]);
    module.declare_fixup(SegmentId::Code, 0, RelocKind::High { low: 0x34 }, SegmentId::Code);
    module.declare_fixup(SegmentId::Code, 1, RelocKind::Seg { offset: 0xFFF0 }, SegmentId::Code);
    module.declare_fixup(SegmentId::Code, 2, RelocKind::Long, SegmentId::Code);
    module.declare_global(SegmentId::Code, "start", 0);

    module.locate(SegmentId::Code, 0xF0);
    let code = module.segment(SegmentId::Code);
    assert_eq!(code.bytes[0], 0x13);
    assert_eq!(code.relocations[0].kind, RelocKind::High { low: 0x24 });
    assert_eq!(code.bytes[1], 0x02);
    assert_eq!(code.relocations[1].kind, RelocKind::Seg { offset: 0x00E0 });
    assert_eq!(&code.bytes[2..5], &[0xEF, 0x01, 0x00]);
    assert_eq!(module.symbol_address("start"), Some(0xF0));
    assert_eq!(module.base(SegmentId::Code), 0xF0);

    module.locate(SegmentId::Code, 0x100);
    let code = module.segment(SegmentId::Code);
    assert_eq!(code.bytes[0], 0x13);
    assert_eq!(code.relocations[0].kind, RelocKind::High { low: 0x34 });
    assert_eq!(code.relocations[1].kind, RelocKind::Seg { offset: 0x00F0 });
}

#[test]
fn locate_only_touches_sites_of_that_segment() {
    let mut module = sample_module();
    module.locate(SegmentId::Data, 0x9007);
    let code = &module.segment(SegmentId::Code).bytes;
    assert_eq!(&code[1..3], &[0x00, 0x10]);
    assert_eq!(&code[4..6], &[0x03, 0x80]);
    assert_eq!(module.symbol_address("table"), Some(0x9008));
    assert_eq!(module.symbol_segment("table"), Some(SegmentId::Data));
}

#[test]
fn verify_lists_undefined_symbols() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0, 0, 0]);
    module.declare_relocation(SegmentId::Code, "alpha", 0, RelocKind::Low);
    module.declare_relocation(SegmentId::Code, "beta", 1, RelocKind::Word);
    let err = module.verify().expect_err("undefined");
    assert_eq!(err.to_string(), "undefined symbols: alpha, beta");
}

#[test]
fn linkage_headers_decode() {
    let module = sample_module();
    assert_eq!(
        module.linkage_wishes(),
        vec![LinkageEntry {
            segment: SegmentId::Code,
            mode: 2,
            param: 1,
        }]
    );
    assert_eq!(module.custom_headers()[0].data[0], 2 * 8 + 2);
}

#[test]
fn encode_rejects_site_outside_segment() {
    let mut module = O65Module::new();
    module.load_segment_from(SegmentId::Code, &[0xEA]);
    module.declare_fixup(SegmentId::Code, 0, RelocKind::Word, SegmentId::Code);
    let err = encode_o65(&module).expect_err("outside");
    assert!(err.to_string().contains("outside segment CODE"));
}

#[test]
fn encode_leaves_out_relocations_of_uninitialized_segments() {
    let mut module = sample_module();
    module.declare_fixup(SegmentId::Bss, 0, RelocKind::Word, SegmentId::Code);
    module.declare_fixup(SegmentId::Zero, 2, RelocKind::Low, SegmentId::Data);

    let decoded = decode_o65(&encode_o65(&module).expect("encode")).expect("decode");
    assert!(decoded.segment(SegmentId::Bss).relocations.is_empty());
    assert!(decoded.segment(SegmentId::Zero).relocations.is_empty());
    assert_eq!(decoded.segment(SegmentId::Bss).bytes.len(), 0x20);
    assert_eq!(
        decoded.segment(SegmentId::Code).relocations,
        sample_module().segment(SegmentId::Code).relocations
    );
}

#[test]
fn fragment_roundtrip_keeps_externs_and_debug_symbols() {
    let mut module = sample_module();
    module.declare_relocation(SegmentId::Code, "irq", 4, RelocKind::Word);
    module.declare_relocation(SegmentId::Data, "nmi", 0, RelocKind::Low);
    module.link_sym("nmi", 0x40).expect("link");
    module.debug_symbols.push(DebugSymbol {
        name: ".loop".to_string(),
        segment: Some(SegmentId::Code),
        address: 0x8003,
    });
    module.debug_symbols.push(DebugSymbol {
        name: "PPUCTRL".to_string(),
        segment: None,
        address: 0x2000,
    });

    let bytes = encode_fragment(&module).expect("encode");
    assert_eq!(&bytes[..4], FRAGMENT_MAGIC);
    let decoded = decode_object(&bytes).expect("decode");
    assert_eq!(decoded, module);
}

#[test]
fn decode_object_rejects_unknown_magic() {
    let err = decode_object(b"ELF\x7f").expect_err("unknown");
    assert!(err.to_string().contains("unrecognized object format"));
}

#[test]
fn ips_roundtrip_with_metadata_records() {
    let mut patch = IpsPatch::default();
    patch.add_data(0x10, &[1, 2, 3]);
    patch.records.push(IpsRecord::Rle {
        address: 0x100,
        count: 4,
        value: 0xFF,
    });
    patch.add_extern("joypad", 0x11, 2);
    patch.add_global("main", 0x10);

    let bytes = encode_ips(&patch).expect("encode");
    assert_eq!(&bytes[..5], IPS_MAGIC);
    assert_eq!(&bytes[bytes.len() - 3..], b"EOF");
    let decoded = decode_ips(&bytes).expect("decode");
    assert_eq!(decoded, patch);
    assert_eq!(
        decoded.lumps(),
        vec![(0x10, vec![1, 2, 3]), (0x100, vec![0xFF; 4])]
    );
}

#[test]
fn ips_data_records_are_big_endian() {
    let mut patch = IpsPatch::default();
    patch.add_data(0x012345, &[0xAA]);
    let bytes = encode_ips(&patch).expect("encode");
    assert_eq!(&bytes[5..11], &[0x01, 0x23, 0x45, 0x00, 0x01, 0xAA]);
}

#[test]
fn ips_rejects_reserved_data_address() {
    let mut patch = IpsPatch::default();
    patch.add_data(2, &[0]);
    let err = encode_ips(&patch).expect_err("reserved");
    assert!(err.to_string().contains("reserved address"));
}

#[test]
fn data_area_coalesces_runs() {
    let mut area = DataArea::new();
    area.write_byte(0x10, 1);
    area.write_byte(0x12, 3);
    assert_eq!(area.holes(), vec![(0x11, 0x12)]);
    area.write_byte(0x11, 2);
    assert!(area.is_contiguous());
    assert_eq!(area.blobs().collect::<Vec<_>>(), vec![(0x10, &[1u8, 2, 3][..])]);

    area.write_lump(0x0E, &[7, 8, 9]);
    assert_eq!(area.content(), vec![7, 8, 9, 2, 3]);
    assert_eq!(area.base(), Some(0x0E));
    assert_eq!(area.top(), Some(0x13));
    assert_eq!(area.byte(0x10), Some(9));
    assert_eq!(area.byte(0x13), None);
}

#[test]
fn data_area_fills_gaps_with_zero() {
    let mut area = DataArea::new();
    area.write_lump(0x8000, &[0xA9, 0x05]);
    area.write_byte(0x8004, 0x60);
    assert_eq!(area.content(), vec![0xA9, 0x05, 0, 0, 0x60]);
    assert_eq!(area.content_range(0x8001, 0x8003), vec![0x05, 0]);
}

#[test]
fn raw_render_pads_to_min_size() {
    let mut area = DataArea::new();
    area.write_lump(0x8001, &[1, 2]);
    assert_eq!(render_raw(&area, 0x8000, 5), vec![0, 1, 2, 0, 0]);
    assert_eq!(render_raw(&area, 0x8000, 0), vec![0, 1, 2]);
}

#[test]
fn nes_header_layout() {
    let header = NesHeader {
        prg_pages: 16,
        chr_pages: 0,
        mapper: 0x42,
        mirroring: 1,
    };
    assert_eq!(
        header.encode(),
        [b'N', b'E', b'S', 0x1A, 16, 0, 0x21, 0x40, 0, 0, 0, 0, 0, 0, 0, 0]
    );
}
