//! Benchmarks for the gameplay packet codec and the emulator frame step.
//!
//! Run with: cargo bench --bench packet_codec

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use stack_arena::network::packet::{
    decode_slot_frame, encode_slot_frame, PacketAssembler, PacketDisassembler,
};
use stack_arena::tetris::{InputKey, KeyState, MtPose};
use stack_arena::{Emulator, Packet, TetrisBoard, TetrominoType};

/// One flush worth of packets from a mid-game player.
fn typical_frame_packets() -> Vec<Packet> {
    let mut board = TetrisBoard::new();
    for y in 12..20 {
        for x in 0..9 {
            board.set(x, y, 1 + (x % 3) as u8);
        }
    }

    let mut packets = vec![Packet::GameStart {
        level: 18,
        current: TetrominoType::T,
        next: TetrominoType::L,
    }];
    for y in 0..12 {
        packets.push(Packet::AbbrBoard {
            delta_ms: 16,
            pose: MtPose { rotation: (y % 4) as u8, x: 5, y },
        });
    }
    packets.push(Packet::Placement {
        next_next: TetrominoType::I,
        pose: MtPose { rotation: 1, x: 9, y: 17 },
        pushdown: 6,
    });
    packets.push(Packet::FullBoard { delta_ms: 16, board });
    packets
}

fn encoded_frame() -> Vec<u8> {
    let mut assembler = PacketAssembler::new();
    for packet in typical_frame_packets() {
        assembler.push(&packet).expect("encode");
    }
    assembler.take()
}

fn benchmark_encode(c: &mut Criterion) {
    let packets = typical_frame_packets();
    let mut group = c.benchmark_group("packet_encode");
    group.throughput(Throughput::Elements(packets.len() as u64));

    group.bench_function("assemble_frame", |b| {
        b.iter(|| {
            let mut assembler = PacketAssembler::new();
            for packet in &packets {
                assembler.push(black_box(packet)).expect("encode");
            }
            black_box(assembler.take())
        })
    });

    let frame = encoded_frame();
    group.bench_function("slot_prefix", |b| {
        b.iter(|| black_box(encode_slot_frame(black_box(1), black_box(&frame))))
    });

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let frame = encoded_frame();
    let relayed = encode_slot_frame(0, &frame);
    let mut group = c.benchmark_group("packet_decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("disassemble_frame", |b| {
        b.iter(|| {
            black_box(
                PacketDisassembler::new(black_box(&frame))
                    .collect_all()
                    .expect("decode"),
            )
        })
    });

    group.bench_function("relayed_frame", |b| {
        b.iter(|| {
            let (slot, packets) = decode_slot_frame(black_box(&relayed)).expect("slot");
            black_box((slot, packets.collect_all().expect("decode")))
        })
    });

    group.finish();
}

fn benchmark_emulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("emulator");
    group.throughput(Throughput::Elements(600));

    // Ten seconds of play at 60 frames per second, holding pushdown with
    // the occasional tap so placements, clears and entry delays all run.
    group.bench_function("ten_seconds_of_frames", |b| {
        b.iter(|| {
            let mut emu = Emulator::new(18, "a1b2c3", 0, None).expect("seed");
            for frame in 0..600u32 {
                let keys = match frame % 8 {
                    0 => KeyState::from(InputKey::ShiftLeft),
                    4 => KeyState::from(InputKey::RotateRight),
                    _ => KeyState::from(InputKey::Pushdown),
                };
                emu.execute_frame(black_box(keys));
                if emu.is_over() {
                    break;
                }
            }
            black_box(emu.score())
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_encode, benchmark_decode, benchmark_emulator);
criterion_main!(benches);
