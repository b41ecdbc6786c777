//! Renders a short polyphonic chord progression offline and prints a
//! per-block level meter.
//!
//! Run with: cargo run --example poly_demo

use voicegraph::engine::{Engine, EngineConfig};
use voicegraph::graph::{Graph, Slot};
use voicegraph::io::notes;
use voicegraph::modulator::{Adsr, Lfo};
use voicegraph::nodes::{Delay, Filter, FilterType, Oscillator, Shape};
use voicegraph::synth::{Priority, SynthMessage};

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK: usize = 512;

fn pad_patch() -> Graph {
    let mut graph = Graph::new();
    let osc = graph.add_node(Box::new(Oscillator::new(Shape::Saw)));
    let mut filter = Filter::new(FilterType::Lowpass);
    filter.set_frequency(2_500.0).unwrap();
    filter.set_resonance(0.3).unwrap();
    let filter = graph.add_node(Box::new(filter));
    let mut delay = Delay::new();
    delay.set_delay(0.3).unwrap();
    delay.set_gain(0.35).unwrap();
    delay.set_feedback(0.4).unwrap();
    let delay = graph.add_node(Box::new(delay));
    graph.connect(osc, filter).unwrap();
    graph.connect(filter, delay).unwrap();

    let env = graph.add_modulator(Box::new(Adsr::with_lengths(0.05, 0.2, 0.1, 0.8)));
    graph.connect_modulator(osc, Slot::AMP, env, 1.0).unwrap();
    let vibrato = graph.add_modulator(Box::new(Lfo::new(Shape::Sine, 5.5)));
    graph
        .connect_modulator(osc, Slot::FREQ, vibrato, 0.15)
        .unwrap();
    graph
}

fn main() {
    let mut engine = Engine::new(
        EngineConfig {
            sample_rate: SAMPLE_RATE,
            polyphony: 8,
            headroom: BLOCK,
            priority: Priority::Fifo,
        },
        pad_patch(),
    );

    let (mut tx, rx) = rtrb::RingBuffer::new(64);
    engine.set_receiver(rx);

    // Two bars: Am then F, half a second each.
    let chords: [&[&str]; 2] = [&["A2", "E3", "C4"], &["F2", "C3", "A3"]];
    let blocks_per_chord = (SAMPLE_RATE as usize / 2) / BLOCK;

    let mut left = vec![0.0f32; BLOCK];
    for chord in chords {
        for name in chord {
            let key = notes::key(name).expect("valid note name");
            tx.push(SynthMessage::NoteOn { key, velocity: 100 }).unwrap();
        }

        for block in 0..blocks_per_chord {
            engine.render_block(&mut [&mut left]).unwrap();
            if block % 8 == 0 {
                print_meter(&left, chord);
            }
        }
        tx.push(SynthMessage::AllNotesOff).unwrap();
    }

    // Let the release and delay tails ring out.
    for _ in 0..2 * blocks_per_chord {
        engine.render_block(&mut [&mut left]).unwrap();
    }
    print_meter(&left, &["(tail)"]);
}

fn print_meter(frames: &[f32], labels: &[&str]) {
    let peak = frames.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    let bars = (peak.min(1.5) * 40.0) as usize;
    println!("{:24} |{:<60}| {:.3}", labels.join(" "), "#".repeat(bars), peak);
}
