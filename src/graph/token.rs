use std::hash::Hasher;

use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

use crate::connection::FrozenValue;
use crate::types::Document;

/// Deterministic digest over graph inputs.
///
/// Equal inputs give equal tokens across runs and processes, which is what
/// lets an execution engine recognise two identical graphs. Documents and
/// filters are frozen first, so key order never changes a token.
pub struct Tokenizer {
    hasher: Xxh64,
}

impl Tokenizer {
    /// Starts an empty digest.
    pub fn new() -> Self {
        Self {
            hasher: Xxh64::new(0),
        }
    }

    /// Adds a string.
    pub fn str(&mut self, value: &str) -> &mut Self {
        self.hasher.write_u64(value.len() as u64);
        self.hasher.write(value.as_bytes());
        self
    }

    /// Adds an integer.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.write_u64(value);
        self
    }

    /// Adds a JSON value.
    pub fn value(&mut self, value: &Value) -> &mut Self {
        self.frozen(&FrozenValue::freeze(value))
    }

    /// Adds a document.
    pub fn document(&mut self, doc: &Document) -> &mut Self {
        self.frozen(&FrozenValue::freeze_map(doc))
    }

    /// Adds an already frozen value.
    pub fn frozen(&mut self, value: &FrozenValue) -> &mut Self {
        feed(&mut self.hasher, value);
        self
    }

    /// Hex rendering of the digest so far.
    pub fn finish(&self) -> String {
        format!("{:016x}", self.hasher.finish())
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn feed(hasher: &mut Xxh64, value: &FrozenValue) {
    match value {
        FrozenValue::Null => hasher.write_u8(0),
        FrozenValue::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(u8::from(*b));
        }
        FrozenValue::Int(i) => {
            hasher.write_u8(2);
            hasher.write(&i.to_le_bytes());
        }
        FrozenValue::Float(bits) => {
            hasher.write_u8(3);
            hasher.write_u64(*bits);
        }
        FrozenValue::Str(s) => {
            hasher.write_u8(4);
            hasher.write_u64(s.len() as u64);
            hasher.write(s.as_bytes());
        }
        FrozenValue::Seq(items) => {
            hasher.write_u8(5);
            hasher.write_u64(items.len() as u64);
            for item in items.iter() {
                feed(hasher, item);
            }
        }
        FrozenValue::Map(entries) => {
            hasher.write_u8(6);
            hasher.write_u64(entries.len() as u64);
            for (key, item) in entries.iter() {
                hasher.write_u64(key.len() as u64);
                hasher.write(key.as_bytes());
                feed(hasher, item);
            }
        }
    }
}
