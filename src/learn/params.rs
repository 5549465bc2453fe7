//! The live parameter vector: feature name to weight, shared by every worker.
//!
//! Each slot holds its weight as `f64` bits in an `AtomicU64` and is adjusted
//! with a compare-and-swap loop, so concurrent SGD updates to one feature add
//! up instead of overwriting each other. A second atomic per slot records the
//! training clock at which the lazy regularizer last settled the feature.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{LearnError, ProResult};

#[derive(Debug)]
struct ParamSlot {
    bits: AtomicU64,
    last: AtomicU64,
}

impl ParamSlot {
    fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
            last: AtomicU64::new(0),
        }
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return f64::from_bits(next),
                Err(seen) => current = seen,
            }
        }
    }
}

/// Concurrent feature weights.
#[derive(Debug, Default)]
pub struct ParamVector {
    slots: DashMap<String, ParamSlot>,
}

impl ParamVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &BTreeMap<String, f64>) -> Self {
        let params = Self::new();
        for (name, w) in map {
            params.set(name, *w);
        }
        params
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.slots.get(name).map(|s| s.get())
    }

    /// The weight of `name`, or `default` for an unseen feature.
    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn set(&self, name: &str, value: f64) {
        match self.slots.get(name) {
            Some(slot) => slot.bits.store(value.to_bits(), Ordering::Release),
            None => {
                self.slots
                    .entry(name.to_string())
                    .or_insert_with(|| ParamSlot::new(value))
                    .bits
                    .store(value.to_bits(), Ordering::Release);
            }
        }
    }

    /// Insert `name` with `value` unless it is already present.
    /// Returns whether it was inserted.
    pub fn insert_if_absent(&self, name: &str, value: f64) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        let mut inserted = false;
        self.slots.entry(name.to_string()).or_insert_with(|| {
            inserted = true;
            ParamSlot::new(value)
        });
        inserted
    }

    /// Atomically add `delta`; an unseen feature starts from zero.
    pub fn adjust(&self, name: &str, delta: f64) -> f64 {
        self.update(name, 0.0, |w| w + delta)
    }

    /// Atomically replace the weight with `f(weight)`; an unseen feature
    /// starts from `initial`.
    pub fn update(&self, name: &str, initial: f64, f: impl Fn(f64) -> f64) -> f64 {
        if let Some(slot) = self.slots.get(name) {
            return slot.update(f);
        }
        let slot = self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| ParamSlot::new(initial))
            .downgrade();
        slot.update(f)
    }

    /// Clock value at which `name` was last settled by the regularizer.
    pub fn last_touched(&self, name: &str) -> u64 {
        self.slots
            .get(name)
            .map(|s| s.last.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Advance the last settlement of `name` to `clock`; returns the previous
    /// value. The clock never moves backwards.
    pub fn touch(&self, name: &str, clock: u64) -> u64 {
        self.slots
            .get(name)
            .map(|s| s.last.fetch_max(clock, Ordering::AcqRel))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Feature names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// A point-in-time copy of every weight.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.slots
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write `feature<TAB>weight` lines in feature order.
    pub fn save(&self, path: &Path) -> ProResult<()> {
        write_weights(path, &self.snapshot())
    }

    /// Read a parameter file. Non-finite weights are rejected.
    pub fn load(path: &Path) -> ProResult<Self> {
        let io_err = |source| LearnError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = std::fs::File::open(path).map_err(io_err)?;
        let params = Self::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err)?;
            if let Some((name, w)) = parse_param_line(&line, i + 1)? {
                params.set(name, w);
            }
        }
        Ok(params)
    }
}

/// Parse one `feature<TAB>weight` line; blank and `#` lines yield `None`.
pub fn parse_param_line(line: &str, number: usize) -> ProResult<Option<(&str, f64)>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let Some((name, value)) = line.rsplit_once('\t') else {
        return Err(LearnError::MalformedParam {
            line: number,
            reason: "expected feature<TAB>weight".into(),
        }
        .into());
    };
    let value = value.trim();
    let w: f64 = value.parse().map_err(|_| LearnError::MalformedParam {
        line: number,
        reason: format!("weight \"{value}\" is not a number"),
    })?;
    if !w.is_finite() {
        return Err(LearnError::NonFiniteParam {
            feature: name.to_string(),
            value: value.to_string(),
            line: number,
        }
        .into());
    }
    Ok(Some((name, w)))
}

/// Write a weight map in the parameter file layout.
pub fn write_weights(path: &Path, weights: &BTreeMap<String, f64>) -> ProResult<()> {
    let io_err = |source| LearnError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    for (name, w) in weights {
        writeln!(out, "{name}\t{w}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn adjust_accumulates_concurrently() {
        let params = Arc::new(ParamVector::new());
        params.set("f", 1.0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let params = Arc::clone(&params);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        params.adjust("f", 0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(params.get("f"), Some(4001.0));
    }

    #[test]
    fn defaults_and_insertion() {
        let params = ParamVector::new();
        assert_eq!(params.get_or("missing", 1.0), 1.0);
        assert!(params.insert_if_absent("a", 0.3));
        assert!(!params.insert_if_absent("a", 0.9));
        assert_eq!(params.get("a"), Some(0.3));
        assert_eq!(params.update("b", 2.0, |w| w * 3.0), 6.0);
    }

    #[test]
    fn touch_tracks_the_clock() {
        let params = ParamVector::new();
        params.set("a", 1.0);
        assert_eq!(params.touch("a", 4), 0);
        assert_eq!(params.last_touched("a"), 4);
        assert_eq!(params.touch("a", 2), 4);
        assert_eq!(params.last_touched("a"), 4);
        assert_eq!(params.last_touched("b"), 0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("params.wts");
        let params = ParamVector::new();
        params.set("id(restart)", 1.0);
        params.set("db(facts)", 0.123456789012345);
        params.set("r(a,b)", -2.5e-7);
        params.save(&path).unwrap();
        let loaded = ParamVector::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), params.snapshot());
    }

    #[test]
    fn non_finite_weights_are_rejected() {
        assert!(parse_param_line("f\tNaN", 1).is_err());
        assert!(parse_param_line("f\tinf", 2).is_err());
        assert!(parse_param_line("f\t-Infinity", 3).is_err());
        assert!(parse_param_line("f", 4).is_err());
        assert_eq!(parse_param_line("# comment", 5).unwrap(), None);
        assert_eq!(parse_param_line("g(x,y)\t0.5", 6).unwrap(), Some(("g(x,y)", 0.5)));
    }
}
