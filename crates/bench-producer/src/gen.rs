/// Fake message data for the benchmark.
///
/// Payloads and keys are generated once up front so the produce loop measures
/// the client, not the random generator.

use rand::Rng;
use uuid::Builder;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Distinct payloads generated per topic
pub const FAKE_DATA_PER_TOPIC: usize = 1000;

pub struct FakeData {
    payloads: Vec<String>,
    keys: Vec<String>,
}

impl FakeData {
    pub fn generate<R: Rng>(rng: &mut R, pool_size: usize, message_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            payloads: (0..pool_size).map(|_| random_message(rng, message_size)).collect(),
            keys: (0..pool_size).map(|_| random_key(rng)).collect(),
        }
    }

    pub fn payload(&self, index: u64) -> &str {
        &self.payloads[(index % self.payloads.len() as u64) as usize]
    }

    pub fn key(&self, index: u64) -> &str {
        &self.keys[(index % self.keys.len() as u64) as usize]
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }
}

pub fn random_message<R: Rng>(rng: &mut R, size: usize) -> String {
    (0..size)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Hyphenated v4 UUID drawn from `rng`.
pub fn random_key<R: Rng>(rng: &mut R) -> String {
    Builder::from_random_bytes(rng.gen()).into_uuid().to_string()
}
