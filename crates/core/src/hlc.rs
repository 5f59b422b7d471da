use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Milliseconds since the Unix epoch according to the system clock.
pub fn physical_now() -> Result<u64, CoreError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CoreError::InvalidData("system clock reads before 1970".into()))?;
    u64::try_from(elapsed.as_millis())
        .map_err(|_| CoreError::InvalidData("system clock out of range".into()))
}

/// Hybrid logical timestamp used for `detected_at`, `resolved_at` and
/// `archived_at`. Orders by wall time, then counter.
///
/// Persisted as 12 bytes: the value `wall_ms << 32 | counter` in big-endian,
/// so SQLite blob comparison agrees with `Ord`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn packed(&self) -> u128 {
        (u128::from(self.wall_ms) << 32) | u128::from(self.counter)
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let wide = self.packed().to_be_bytes();
        let mut out = [0u8; 12];
        out.copy_from_slice(&wide[4..]);
        out
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wide = [0u8; 16];
        wide[4..].copy_from_slice(bytes);
        let packed = u128::from_be_bytes(wide);
        Self {
            wall_ms: (packed >> 32) as u64,
            counter: packed as u32,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        <&[u8; 12]>::try_from(bytes)
            .map(Self::from_bytes)
            .map_err(|_| CoreError::InvalidData(format!("hlc must be 12 bytes, got {}", bytes.len())))
    }
}

impl fmt::Debug for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hlc({}.{})", self.wall_ms, self.counter)
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

struct HlcVisitor;

impl<'de> Visitor<'de> for HlcVisitor {
    type Value = Hlc;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("12 hlc bytes")
    }

    fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<Hlc, E> {
        Hlc::from_slice(bytes).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Hlc, A::Error> {
        let mut bytes = Vec::with_capacity(12);
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Hlc::from_slice(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(HlcVisitor)
    }
}

/// Issues strictly increasing [`Hlc`] values for one engine.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: Option<Hlc>,
}

impl HlcClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        let next = match self.last {
            Some(last) if last.wall_ms >= now => {
                let counter = last
                    .counter
                    .checked_add(1)
                    .ok_or_else(|| CoreError::InvalidData("hlc counter exhausted".into()))?;
                Hlc::new(last.wall_ms, counter)
            }
            _ => Hlc::new(now, 0),
        };
        self.last = Some(next);
        Ok(next)
    }
}
