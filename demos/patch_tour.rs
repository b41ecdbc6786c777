//! Walks through the building blocks one at a time: pool allocation and
//! stealing, graph topology rules, and each built-in node rendered against
//! a single voice.
//!
//! Run with: cargo run --example patch_tour

use voicegraph::graph::{Graph, Request, Slot};
use voicegraph::io::notes;
use voicegraph::modulator::{Adsr, Lfo};
use voicegraph::nodes::{Delay, Filter, FilterType, Oscillator, Shape};
use voicegraph::synth::VoicePool;

const SAMPLE_RATE: f32 = 48_000.0;

fn main() {
    pool_tour();
    graph_tour();
    node_tour();
}

fn pool_tour() {
    println!("== voice pool ==");
    let mut pool = VoicePool::new(2);
    for name in ["C4", "E4", "G4"] {
        let key = notes::key(name).unwrap();
        let id = pool.press(key, 0.8).unwrap().unwrap();
        println!(
            "press {:3} -> voice {} ({:.1} Hz)",
            name,
            id,
            pool.voice(id).unwrap().frequency()
        );
    }
    println!(
        "stolen stack: {:?}",
        pool.stolen().iter().map(|s| s.key).collect::<Vec<_>>()
    );

    pool.release(notes::key("G4").unwrap()).unwrap();
    let ids: Vec<_> = pool.voices().to_vec();
    let id = ids
        .into_iter()
        .find(|&id| pool.voice(id).is_some_and(|v| v.repossessed()))
        .unwrap();
    let voice = pool.voice(id).unwrap();
    println!(
        "release G4 -> voice {} repossessed key {} (still pressed: {})",
        id,
        voice.key(),
        voice.pressed()
    );
    println!();
}

fn graph_tour() {
    println!("== graph ==");
    let mut graph = Graph::new();
    let osc = graph.add_node(Box::new(Oscillator::new(Shape::Triangle)));
    let filter = graph.add_node(Box::new(Filter::new(FilterType::Lowpass)));
    graph.connect(osc, filter).unwrap();

    println!("osc -> filter connected");
    println!("filter -> osc allowed? {}", graph.can_connect(filter, osc));
    println!(
        "sinks: {} of {} nodes",
        graph.sinks().count(),
        graph.len()
    );
    println!();
}

fn node_tour() {
    println!("== built-in nodes ==");
    let mut pool = VoicePool::new(1);
    let id = pool.press(notes::key("A3").unwrap(), 1.0).unwrap().unwrap();

    let mut graph = Graph::new();
    let osc = graph.add_node(Box::new(Oscillator::new(Shape::Square)));
    let mut filter = Filter::new(FilterType::Lowpass);
    filter.set_frequency(1_200.0).unwrap();
    filter.set_resonance(0.5).unwrap();
    let filter = graph.add_node(Box::new(filter));
    let mut delay = Delay::new();
    delay.set_delay(0.02).unwrap();
    delay.set_gain(0.5).unwrap();
    let delay = graph.add_node(Box::new(delay));
    graph.connect(osc, filter).unwrap();
    graph.connect(filter, delay).unwrap();

    let env = graph.add_modulator(Box::new(Adsr::with_lengths(0.02, 0.05, 0.1, 0.2)));
    graph.connect_modulator(osc, Slot::AMP, env, 1.0).unwrap();
    let wobble = graph.add_modulator(Box::new(Lfo::new(Shape::Sine, 3.0)));
    graph.connect_modulator(osc, Slot::FREQ, wobble, 0.5).unwrap();

    graph.prepare(2048);
    let request = Request::new(pool.voice(id).unwrap(), SAMPLE_RATE);
    let n = graph.render(&request).unwrap();
    let out = graph.buffer(delay).unwrap();
    let peak = out.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    println!("rendered {} frames, peak {:.3}", n, peak);

    // Sweep the cutoff from the control side between blocks.
    for cutoff in [400.0, 800.0, 1_600.0, 3_200.0] {
        graph
            .node_as_mut::<Filter>(filter)
            .unwrap()
            .set_frequency(cutoff)
            .unwrap();
        graph.prepare(2048);
        graph.render(&request).unwrap();
        let out = graph.buffer(delay).unwrap();
        let rms = (out.iter().map(|s| s * s).sum::<f32>() / out.len() as f32).sqrt();
        println!("cutoff {:6.0} Hz -> rms {:.3}", cutoff, rms);
    }
}
