//! Generate synthetic binary trace files.
//!
//! Assembles a small looping program with a mix of branch patterns, calls,
//! and indirect transfers, then records its event stream through a real
//! [TraceSession], one sink per simulated thread.

use axon::*;
use itertools::Itertools;
use log::error;
use std::env;
use std::sync::Arc;

fn build_program() -> TraceAssembler {
    let mut e = TraceAssembler::new(0x1000_0000);
    let start = e.create_label();
    let skip = e.create_label();
    let f1 = e.create_label();
    let f2 = e.create_label();

    e.bind_label(start);
    e.branch_to_label(skip, BranchPattern::NeverTaken);
    e.branch_to_label(
        skip,
        BranchPattern::Pattern(&[Outcome::T, Outcome::T, Outcome::N, Outcome::N]),
    );
    e.branch_to_label(skip, BranchPattern::TakenPeriodic(4));
    e.branch_to_label(skip, BranchPattern::Random);

    e.bind_label(skip);
    e.pad_align(0x100);
    e.call_to_label(f1);
    e.call_indirect(&[f1, f2]);
    e.jump_to_label(start);

    e.bind_label(f1);
    e.ret();

    e.bind_label(f2);
    e.pad(0x10);
    e.ret();

    e
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("usage: {} <output dir> [max-events] [threads]", args[0]);
        return;
    }
    let max_events: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4096);
    let threads: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1);

    let cfg = TraceConfig {
        output_dir: args[1].clone().into(),
        tool_name: "axon".to_string(),
        flush_each: false,
    };
    let session = match TraceSession::new(cfg) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("cannot start session: {}", e);
            std::process::exit(1);
        }
    };

    let mut handles = Vec::new();
    for t in 0..threads {
        let session = Arc::clone(&session);
        handles.push(std::thread::spawn(move || {
            let tid = ThreadId::new(t);
            let trace = build_program().compile(max_events);
            let path = session.thread_start(tid)?;
            for ev in &trace.events {
                session.record(tid, ev)?;
            }
            let written = session.thread_stop(tid)?;
            let summary = trace.events.iter().map(|ev| ev.kind()).counts();
            Ok::<_, TraceError>((tid, path, written, summary))
        }));
    }

    for handle in handles {
        match handle.join().unwrap() {
            Ok((tid, path, written, summary)) => {
                println!("[*] thread {}: {} records -> {}", tid.id(), written, path.display());
                for (kind, count) in summary.iter().sorted() {
                    println!("      {:<13} {}", format!("{:?}", kind), count);
                }
            }
            Err(e) => {
                error!("trace generation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = session.finish() {
        error!("session teardown failed: {}", e);
        std::process::exit(1);
    }
}
