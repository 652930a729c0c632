use super::*;
use nes65_o65::{IpsRecord, decode_ips, decode_o65};

fn placed_linker(map: RomMap, lumps: &[(u32, &[u8], &str)]) -> Linker {
    let mut linker = Linker::new(map);
    for (address, bytes, name) in lumps {
        linker
            .add_lump(bytes, Some(*address), name, Some(name))
            .expect("lump");
    }
    linker.link().expect("link");
    linker
}

fn two_lumps() -> LinkedImage {
    let linker = placed_linker(
        RomMap::new(2),
        &[
            (0xC000, &[0xA9, 0x01, 0x60][..], "reset"),
            (0x8010, &[0x11, 0x22][..], "table"),
        ],
    );
    LinkedImage::collect(&linker)
}

#[test]
fn collected_image_names_every_segment() {
    let image = two_lumps();
    let labels: Vec<_> = image.labels().map(|(name, _, _)| name.to_string()).collect();
    assert_eq!(labels, vec!["object_1_CODE", "reset", "object_2_CODE", "table"]);
    assert_eq!(image.label("object_2_CODE"), Some(0x8010));
    assert_eq!(image.label("reset"), Some(0xC000));
    assert_eq!(image.area(SegmentId::Code).byte(0xC001), Some(0x01));
    assert!(image.area(SegmentId::Data).is_empty());
}

#[test]
fn rom_image_maps_banks_to_file_offsets() {
    let rom = render_rom(&two_lumps(), RomMap::new(2));
    assert_eq!(rom.len(), 0x8000);
    assert_eq!(&rom[0x10..0x12], &[0x11, 0x22]);
    assert_eq!(&rom[0x4000..0x4003], &[0xA9, 0x01, 0x60]);
}

#[test]
fn switchable_banks_land_in_their_page() {
    let linker = placed_linker(RomMap::new(4), &[(0x01_9FFF, &[5, 6][..], "edge")]);
    let rom = render_rom(&LinkedImage::collect(&linker), RomMap::new(4));
    assert_eq!(rom.len(), 0x10000);
    assert_eq!(&rom[0x5FFF..0x6001], &[5, 6]);
}

#[test]
fn bytes_outside_rom_are_left_out() {
    let linker = placed_linker(RomMap::new(2), &[(0x0300, &[1, 2, 3][..], "ram")]);
    let rom = render_rom(&LinkedImage::collect(&linker), RomMap::new(2));
    assert_eq!(rom.len(), 0x8000);
    assert!(rom.iter().all(|byte| *byte == 0));
}

#[test]
fn nes_image_starts_with_the_header() {
    let config = small_config(OutputFormat::Nes);
    let out = render(&two_lumps(), &config).expect("render");
    assert_eq!(out.len(), 16 + 0x8000);
    assert_eq!(&out[..4], b"NES\x1A");
    assert_eq!(out[4], 2);
    assert_eq!(out[5], 0);
    assert_eq!(out[6], 0x21);
    assert_eq!(out[16 + 0x4000], 0xA9);
}

#[test]
fn ips_output_carries_data_and_labels() {
    let bytes = render_ips(&two_lumps()).expect("render");
    let patch = decode_ips(&bytes).expect("decode");
    assert!(patch.records.contains(&IpsRecord::Data {
        address: 0xC000,
        bytes: vec![0xA9, 0x01, 0x60],
    }));
    assert!(patch.records.contains(&IpsRecord::Global {
        name: "table".to_string(),
        address: 0x8010,
    }));
}

#[test]
fn o65_output_spans_the_code_area() {
    let bytes = render_o65(&two_lumps()).expect("render");
    let module = decode_o65(&bytes).expect("decode");
    assert_eq!(module.base(SegmentId::Code), 0x8010);
    assert_eq!(module.segment_size(SegmentId::Code), 0xC003 - 0x8010);
    assert_eq!(module.symbol_address("reset"), Some(0xC000));
    assert_eq!(module.segment(SegmentId::Code).bytes[0], 0x11);
}
