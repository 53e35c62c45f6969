use log::debug;
use pprof::protos::{Function, Line, Location, Message, Profile, Sample, ValueType};
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::symbolization::Symbolizer;

/// Builds `perftools.profiles.Profile` messages from raw address stacks
///
/// Profile spec: <https://github.com/google/pprof/blob/main/proto/profile.proto>
///
/// Strings, functions and locations are interned so a stack frame shared by
/// many samples is stored (and symbolized) once.
pub struct PprofExporter {
    symbolizer: Symbolizer,
    /// Index 0 must be the empty string
    strings: Vec<String>,
    string_ids: HashMap<String, i64>,
    functions: Vec<Function>,
    /// (name, file) -> function id
    function_ids: HashMap<(i64, i64), u64>,
    locations: Vec<Location>,
    /// address -> location id
    location_ids: HashMap<u64, u64>,
    sample_types: Vec<ValueType>,
    samples: Vec<Sample>,
    period_type: Option<ValueType>,
    period: i64,
    drop_frames: i64,
}

impl PprofExporter {
    /// Create an exporter whose samples carry one value per `(type, unit)` pair
    #[must_use]
    pub fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut exporter = Self {
            symbolizer: Symbolizer::new(),
            strings: vec![String::new()],
            string_ids: HashMap::from([(String::new(), 0)]),
            functions: Vec::new(),
            function_ids: HashMap::new(),
            locations: Vec::new(),
            location_ids: HashMap::new(),
            sample_types: Vec::new(),
            samples: Vec::new(),
            period_type: None,
            period: 0,
            drop_frames: 0,
        };
        let types: Vec<ValueType> =
            sample_types.iter().map(|(ty, unit)| exporter.value_type(ty, unit)).collect();
        exporter.sample_types = types;
        exporter
    }

    /// Record what one sampling event represents (e.g. `space/bytes`, 4096)
    pub fn set_period(&mut self, ty: &str, unit: &str, period: i64) {
        self.period_type = Some(self.value_type(ty, unit));
        self.period = period;
    }

    /// Regex of frames viewers should hide (the profiler's own machinery)
    pub fn set_drop_frames(&mut self, pattern: &str) {
        self.drop_frames = self.string(pattern);
    }

    /// Add one sample; `stack` is leaf first, `values` match the sample types
    pub fn add_sample(&mut self, stack: &[u64], values: Vec<i64>) {
        debug_assert_eq!(values.len(), self.sample_types.len());
        let location_id = stack.iter().map(|&addr| self.location(addr)).collect();
        self.samples.push(Sample { location_id, value: values, ..Default::default() });
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Assemble the profile message
    #[must_use]
    pub fn build(self) -> Profile {
        #[allow(clippy::cast_possible_truncation)]
        let time_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();

        Profile {
            sample_type: self.sample_types,
            sample: self.samples,
            location: self.locations,
            function: self.functions,
            string_table: self.strings,
            time_nanos,
            period_type: self.period_type,
            period: self.period,
            drop_frames: self.drop_frames,
            ..Default::default()
        }
    }

    /// Encode the profile as uncompressed protobuf into `writer`
    ///
    /// # Errors
    /// Returns an error if writing fails
    pub fn export<W: Write>(self, writer: &mut W) -> io::Result<()> {
        let samples = self.samples.len();
        let buf = self.build().encode_to_vec();
        debug!("Encoded pprof profile: {samples} samples, {} bytes", buf.len());
        writer.write_all(&buf)
    }

    fn string(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        #[allow(clippy::cast_possible_wrap)]
        let id = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), id);
        id
    }

    fn value_type(&mut self, ty: &str, unit: &str) -> ValueType {
        ValueType { ty: self.string(ty), unit: self.string(unit) }
    }

    fn function(&mut self, name: &str, file: &str) -> u64 {
        let key = (self.string(name), self.string(file));
        if let Some(&id) = self.function_ids.get(&key) {
            return id;
        }
        let id = self.functions.len() as u64 + 1;
        self.functions.push(Function {
            id,
            name: key.0,
            system_name: key.0,
            filename: key.1,
            ..Default::default()
        });
        self.function_ids.insert(key, id);
        id
    }

    fn location(&mut self, addr: u64) -> u64 {
        if let Some(&id) = self.location_ids.get(&addr) {
            return id;
        }

        let resolved = self.symbolizer.resolve(addr);
        let line = resolved
            .frames
            .iter()
            .map(|frame| {
                let file = frame.location.as_ref().and_then(|loc| loc.file.as_deref()).unwrap_or("");
                let line = frame.location.as_ref().and_then(|loc| loc.line).unwrap_or(0);
                Line {
                    function_id: self.function(&frame.function, file),
                    line: i64::from(line),
                    ..Default::default()
                }
            })
            .collect();

        let id = self.locations.len() as u64 + 1;
        self.locations.push(Location { id, address: addr, line, ..Default::default() });
        self.location_ids.insert(addr, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn here() -> u64 {
        here as *const () as usize as u64 + 1
    }

    #[test]
    fn test_string_table_starts_empty() {
        let exporter = PprofExporter::new(&[("contentions", "count"), ("delay", "nanoseconds")]);
        let profile = exporter.build();
        assert_eq!(profile.string_table[0], "");
        assert_eq!(profile.sample_type.len(), 2);
        assert_eq!(profile.string_table[profile.sample_type[1].ty as usize], "delay");
        assert_eq!(profile.string_table[profile.sample_type[1].unit as usize], "nanoseconds");
    }

    #[test]
    fn test_shared_frames_are_interned() {
        let mut exporter = PprofExporter::new(&[("samples", "count")]);
        let leaf = here();
        exporter.add_sample(&[leaf, 0x2000], vec![1]);
        exporter.add_sample(&[leaf, 0x3000], vec![2]);
        assert_eq!(exporter.sample_count(), 2);

        let profile = exporter.build();
        assert_eq!(profile.location.len(), 3);
        assert_eq!(profile.sample[0].location_id[0], profile.sample[1].location_id[0]);
        assert!(profile.location.iter().all(|loc| !loc.line.is_empty()));
        for loc in &profile.location {
            for line in &loc.line {
                assert!(profile.function.iter().any(|f| f.id == line.function_id));
            }
        }
    }

    #[test]
    fn test_export_decodes() {
        let mut exporter = PprofExporter::new(&[("alloc_objects", "count"), ("alloc_space", "bytes")]);
        exporter.set_period("space", "bytes", 4096);
        exporter.add_sample(&[here()], vec![3, 96]);

        let mut buf = Vec::new();
        exporter.export(&mut buf).unwrap();
        assert!(!buf.is_empty());

        let decoded = Profile::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded.period, 4096);
        assert_eq!(decoded.sample.len(), 1);
        assert_eq!(decoded.sample[0].value, vec![3, 96]);
        let period_type = decoded.period_type.unwrap();
        assert_eq!(decoded.string_table[period_type.ty as usize], "space");
    }
}
