//! Benchmarks for the wire and talker alias codecs.
//!
//! Run with: cargo bench --bench codec

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hbrelay::homebrew::config::{build_config_data, parse_config_data, RepeaterConfiguration};
use hbrelay::homebrew::wire::{build_data, parse_data};
use hbrelay::lc::{parse_header, DataFormat, TalkerAliasHeaderPdu};
use hbrelay::{CallType, DataType, Packet};

fn test_packet() -> Packet {
    Packet {
        sequence: 1,
        src_id: 2_041_001,
        dst_id: 2041,
        repeater_id: 2042,
        timeslot: 0,
        call_type: CallType::Group,
        stream_id: 0x0bad_cafe,
        data_type: DataType::VoiceBurstA,
        ber: 0,
        rssi: 0,
        data: [0x55; 33],
    }
}

fn test_config() -> RepeaterConfiguration {
    RepeaterConfiguration {
        id: 2042,
        callsign: "N0CALL".to_string(),
        rx_freq: 438_200_000,
        tx_freq: 430_600_000,
        tx_power: 25,
        color_code: 1,
        latitude: 51.5,
        longitude: 5.125,
        height: 30,
        location: "Bench site".to_string(),
        description: "bench".to_string(),
        slots: 2,
        url: "https://example.org".to_string(),
        software_id: "bench-sw".to_string(),
        package_id: "bench-pkg".to_string(),
    }
}

fn bench_dmr_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("dmr_frame");

    let packet = test_packet();
    group.bench_function("build", |b| {
        b.iter(|| build_data(black_box(&packet), black_box(2042)))
    });

    let frame = build_data(&packet, 2042);
    group.bench_function("parse", |b| b.iter(|| parse_data(black_box(&frame))));

    group.finish();
}

fn bench_config_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_frame");

    let config = test_config();
    group.bench_function("build", |b| b.iter(|| build_config_data(black_box(&config))));

    let frame = build_config_data(&config);
    group.bench_function("parse", |b| b.iter(|| parse_config_data(black_box(&frame))));

    group.finish();
}

fn bench_talker_alias(c: &mut Criterion) {
    let mut group = c.benchmark_group("talker_alias");

    let pdu = TalkerAliasHeaderPdu {
        data_format: DataFormat::SevenBit,
        length: 7,
        data: b"GO DMR\0".to_vec(),
    };
    group.bench_function("encode_7bit", |b| b.iter(|| black_box(&pdu).bytes()));

    let frame = pdu.bytes();
    group.bench_function("parse_7bit", |b| b.iter(|| parse_header(black_box(&frame))));

    group.finish();
}

criterion_group!(benches, bench_dmr_frame, bench_config_frame, bench_talker_alias);
criterion_main!(benches);
