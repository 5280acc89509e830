//! Persisted signature seed handling.

use log::{info, warn};
use rand::Rng;
use std::io;
use std::path::Path;

pub const DEFAULT_SEED_FILE: &str = "beacon.sig";

/// Loads the signature seed from `path`, generating and persisting a fresh
/// one when the file is missing or does not parse. The seed is the shared
/// secret behind every challenge sequence, so it is created once and then
/// reused across restarts; hosts keep working as long as the file survives.
pub fn get_or_create_seed(path: &Path) -> io::Result<i32> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            if let Ok(seed) = contents.trim().parse::<i32>() {
                return Ok(seed);
            }
            warn!(
                "Signature seed file {} is unreadable, generating a new seed",
                path.display()
            );
        }
        Err(_) => {
            info!("Signature seed file {} not found", path.display());
        }
    }

    let seed: i32 = rand::thread_rng().gen_range(0..i32::MAX);
    std::fs::write(path, seed.to_string())?;
    info!("New signature seed written to {}", path.display());
    Ok(seed)
}
