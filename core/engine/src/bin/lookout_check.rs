//! Debug utility for exercising the full pipeline against synthetic frames.
//!
//! Replays two objects crossing the frame through the tracker, ledger,
//! media store, and broadcaster, then prints what a dashboard would see.

use chrono::{DateTime, Duration, Utc};

use lookout_engine::config::{EngineConfig, StorageSection};
use lookout_engine::logging::init_logging;
use lookout_engine::pipeline::{Detector, FrameSource, Pipeline};
use lookout_engine::track::Detection;
use lookout_engine::FrameBuffer;
use lookout_protocol::{BoundingBox, ConfigPatch};

const FRAMES: u64 = 40;

struct SyntheticSource {
    frame: u64,
    clock: DateTime<Utc>,
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Option<(FrameBuffer, DateTime<Utc>)> {
        if self.frame >= FRAMES {
            return None;
        }
        self.frame += 1;
        self.clock += Duration::milliseconds(33);
        Some((FrameBuffer::solid(320, 240, [32, 32, 32]), self.clock))
    }
}

struct SyntheticDetector {
    frame: u64,
}

impl Detector for SyntheticDetector {
    fn infer(&mut self, _frame: &FrameBuffer, _image_size: u32) -> Vec<Detection> {
        self.frame += 1;
        let t = self.frame as f32;
        let mut detections = vec![Detection::new(
            "person",
            0.9,
            BoundingBox::new(10.0 + t * 3.0, 60.0, 40.0, 90.0),
        )];
        // A car enters at frame 10 and leaves at frame 30.
        if (10..30).contains(&self.frame) {
            detections.push(Detection::new(
                "car",
                0.75,
                BoundingBox::new(280.0 - t * 4.0, 120.0, 70.0, 45.0),
            ));
        }
        detections
    }
}

fn main() {
    let data_dir = std::env::temp_dir().join("lookout-check");
    let config = EngineConfig {
        storage: StorageSection {
            data_dir: data_dir.clone(),
        },
        ..Default::default()
    };
    let _guard = init_logging(&config.logging);

    println!("═══════════════════════════════════════════════════════════");
    println!("  Lookout Pipeline Check - Validation Harness");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Data directory: {}", data_dir.display());
    println!();

    let (mut pipeline, handle) = match Pipeline::new(&config) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("Failed to start pipeline: {}", err);
            std::process::exit(1);
        }
    };
    let subscription = handle.broadcaster.subscribe();

    // Tighten the save threshold mid-setup the way a dashboard would.
    if let Err(err) = handle.settings.apply(&ConfigPatch {
        save_confidence: Some(0.7),
        ..Default::default()
    }) {
        eprintln!("Config patch rejected: {}", err);
    }

    let mut source = SyntheticSource {
        frame: 0,
        clock: Utc::now(),
    };
    let mut detector = SyntheticDetector { frame: 0 };
    pipeline.run(&mut source, &mut detector);

    println!("── Published Snapshot ────────────────────────────────────");
    match handle.broadcaster.current() {
        Some(snapshot) => {
            println!("  frame {} │ {} active tracks", snapshot.frame_number, snapshot.tracks.len());
            for track in &snapshot.tracks {
                println!(
                    "  #{} {} conf={:.2} phase={:?} media={}",
                    track.track_id,
                    track.class_name,
                    track.confidence,
                    track.phase,
                    track.jpeg_url.as_deref().unwrap_or("-")
                );
            }
        }
        None => println!("  (no snapshot published)"),
    }
    println!();

    println!("── Push Delivery ─────────────────────────────────────────");
    let mut delivered = 0;
    let mut last_frame = 0;
    while let Some(snapshot) = subscription.try_recv() {
        delivered += 1;
        last_frame = snapshot.frame_number;
    }
    println!("  {} snapshots buffered, newest = frame {}", delivered, last_frame);
    println!();

    println!("── Sessions ──────────────────────────────────────────────");
    match handle.ledger.list_sessions() {
        Ok(sessions) => {
            for session in sessions {
                println!(
                    "  {} │ active={} │ detections={} tracks={} gifs={} ({} bytes)",
                    session.session_id,
                    session.active,
                    session.detections,
                    session.tracks,
                    session.gifs,
                    session.size_bytes
                );
            }
        }
        Err(err) => println!("  session query failed: {}", err),
    }
    println!();

    println!("── Detection Log (tail) ──────────────────────────────────");
    match handle.ledger.detections(None, Some(5)) {
        Ok(records) => {
            if records.is_empty() {
                println!("  (no detections recorded)");
            }
            for record in records {
                println!(
                    "  frame {:>3} │ #{} {} conf={:.2} ({:?})",
                    record.frame_number,
                    record.track_id,
                    record.class_name,
                    record.confidence,
                    record.kind
                );
            }
        }
        Err(err) => println!("  detection query failed: {}", err),
    }
    println!();

    println!("═══════════════════════════════════════════════════════════");
    println!("  Validation complete");
    println!("═══════════════════════════════════════════════════════════");
}
