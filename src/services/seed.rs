//! Synthetic reading series for demos: a diurnal temperature/humidity curve
//! with a little noise, pushed through the normal submission path.

use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::models::node::NodeFields;
use crate::models::reading::Reading;
use crate::storage::Storage;

/// Samples per simulated day; one sample every 15 minutes.
const SAMPLES_PER_DAY: usize = 96;
const SEED: u64 = 0x0420_1337_DEAD_BEEF;

/// Register `node_id` if needed and submit `count` synthetic readings.
/// Returns the number of readings recorded.
pub fn run(storage: &Storage, node_id: &str, count: usize) -> Result<usize> {
    match storage.get_node(node_id) {
        Ok(_) => {}
        Err(Error::NotFound(_)) => {
            storage.create_node(NodeFields::new(node_id).name("Synthetic"))?;
        }
        Err(e) => return Err(e),
    }

    let mut rng = SmallRng::seed_from_u64(SEED);
    info!("Seed: generating {} reading(s) for node {}", count, node_id);
    for i in 0..count {
        let day_fraction = (i % SAMPLES_PER_DAY) as f64 / SAMPLES_PER_DAY as f64;
        storage.submit_reading(node_id, synthetic_reading(day_fraction, &mut rng))?;
        if (i + 1) % SAMPLES_PER_DAY == 0 {
            info!("Seed: {} of {} reading(s) stored", i + 1, count);
        }
    }
    Ok(count)
}

fn synthetic_reading(day_fraction: f64, rng: &mut SmallRng) -> Reading {
    let diurnal = ((day_fraction - 0.3) * 2.0 * PI).sin();
    let temperature = (20.0 + diurnal * 4.0 + rng.random_range(-0.3..=0.3)).clamp(-40.0, 85.0);
    // Relative humidity falls as the air warms.
    let humidity = (55.0 - diurnal * 10.0 + rng.random_range(-1.5..=1.5)).clamp(0.0, 100.0);
    Reading::new(round_to_tenth(temperature), round_to_tenth(humidity))
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
