//! Values for exercising an export, produced three ways:
//!
//! - heuristic: the extremes of each scalar type, values around its half and
//!   quarter range, special floats, and pointers that are null or point
//!   nowhere valid;
//! - mutational: variations of a known good value;
//! - random: values drawn uniformly from the type's range.
//!
//! Pointers only ever get heuristic values. Anything else could point into
//! memory the harness itself relies on.

use std::collections::{BTreeSet, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_derive::Serialize;

use crate::layout::DataModel;
use crate::model::{Model, ModelError};

const PROBE_SPREAD: i128 = 5;

/// How far around the original value mutational values reach by default.
pub const MUTATE_RANGE: u32 = 5;

const SPECIAL_CHARS: &[u8] = b"\0\r\n\x08\t @%:\\/|=,;)(\".\xff";

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Probe {
    Signed(i64),
    Unsigned(u64),
    Char(u8),
    Float(f64),
    Pointer(u64),
}

impl Probe {
    /// Identity for deduplication, distinguishing NaN payloads and `-0.0`.
    fn key(&self) -> (u8, u64) {
        match *self {
            Probe::Signed(x) => (0, x as u64),
            Probe::Unsigned(x) => (1, x),
            Probe::Char(x) => (2, u64::from(x)),
            Probe::Float(x) => (3, x.to_bits()),
            Probe::Pointer(x) => (4, x),
        }
    }
}

/// Probe values for one parameter. Composites passed by value carry one
/// entry per member instead of values of their own.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ParamProbes {
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Probe>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ParamProbes>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Scalar {
    Char,
    Signed { min: i128, max: i128 },
    Unsigned { max: i128 },
    Float { max: f64, min_positive: f64 },
    Pointer,
}

fn classify(code: &str, model: DataModel) -> Result<Scalar, ModelError> {
    if code.starts_with('P') {
        return Ok(Scalar::Pointer);
    }

    let mut chars = code.chars();
    let single = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => return Err(ModelError::UnknownCode(code.to_owned())),
    };

    let bytes = match single {
        'c' => return Ok(Scalar::Char),
        'f' => {
            return Ok(Scalar::Float {
                max: f64::from(f32::MAX),
                min_positive: f64::from(f32::MIN_POSITIVE),
            })
        }
        'd' => {
            return Ok(Scalar::Float {
                max: f64::MAX,
                min_positive: f64::MIN_POSITIVE,
            })
        }
        'b' | 'B' => 1,
        'h' | 'H' => 2,
        'i' | 'I' => 4,
        'l' | 'L' => model.long_size() as u32,
        'q' | 'Q' => 8,
        _ => return Err(ModelError::UnknownCode(code.to_owned())),
    };

    let bits = bytes * 8;
    if single.is_ascii_lowercase() {
        Ok(Scalar::Signed {
            min: -(1i128 << (bits - 1)),
            max: (1i128 << (bits - 1)) - 1,
        })
    } else {
        Ok(Scalar::Unsigned {
            max: (1i128 << bits) - 1,
        })
    }
}

fn integers(values: BTreeSet<i128>, min: i128, max: i128, signed: bool) -> Vec<Probe> {
    values
        .into_iter()
        .filter(|x| *x >= min && *x <= max)
        .map(|x| {
            if signed {
                Probe::Signed(x as i64)
            } else {
                Probe::Unsigned(x as u64)
            }
        })
        .collect()
}

fn signed(min: i128, max: i128) -> Vec<Probe> {
    let mut values = BTreeSet::new();
    for x in 0..PROBE_SPREAD {
        for &anchor in &[min / 2, max / 2, min / 4, max / 4, 0] {
            values.insert(anchor + x);
            values.insert(anchor - x);
        }
        values.insert(min + x);
        values.insert(max - x);
    }
    integers(values, min, max, true)
}

fn unsigned(max: i128) -> Vec<Probe> {
    let mut values = BTreeSet::new();
    for x in 0..PROBE_SPREAD {
        for &anchor in &[max / 2, max / 4] {
            values.insert(anchor + x);
            values.insert(anchor - x);
        }
        values.insert(x);
        values.insert(max - x);
    }
    integers(values, 0, max, false)
}

fn floats(max: f64, min_positive: f64) -> Vec<Probe> {
    let magnitudes = [
        max,
        max / 2.0,
        max / 3.0,
        max / 4.0,
        min_positive,
        min_positive * 2.0,
        min_positive * 3.0,
        min_positive * 4.0,
    ];

    let mut values = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, -0.0];
    for &magnitude in &magnitudes {
        values.push(magnitude);
        values.push(-magnitude);
    }
    dedup(values.into_iter().map(Probe::Float).collect())
}

fn pointers(model: DataModel) -> Vec<Probe> {
    let all_ones = if model.pointer_size() == 8 {
        u64::MAX
    } else {
        u64::from(u32::MAX)
    };
    vec![
        Probe::Pointer(0),
        Probe::Pointer(all_ones),
        Probe::Pointer(0x8000_0000),
    ]
}

fn dedup(values: Vec<Probe>) -> Vec<Probe> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|x| seen.insert(x.key())).collect()
}

/// Boundary values for a scalar or pointer format code.
pub fn heuristic(code: &str, model: DataModel) -> Result<Vec<Probe>, ModelError> {
    Ok(match classify(code, model)? {
        Scalar::Char => SPECIAL_CHARS.iter().map(|&c| Probe::Char(c)).collect(),
        Scalar::Signed { min, max } => signed(min, max),
        Scalar::Unsigned { max } => unsigned(max),
        Scalar::Float { max, min_positive } => floats(max, min_positive),
        Scalar::Pointer => pointers(model),
    })
}

fn bad_value(code: &str, value: &Probe) -> ModelError {
    ModelError::BadValue {
        code: code.to_owned(),
        value: format!("{:?}", value),
    }
}

fn swap_case(c: u8) -> u8 {
    if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c.to_ascii_lowercase()
    }
}

/// Variations of `original`, a value of type `code`: everything within
/// `range` of it, its negation, and its halves, quarters, doubles and
/// quadruples, as far as the type can hold them. Characters are swapped
/// between digits and letters instead.
pub fn mutational(
    code: &str,
    original: Probe,
    range: u32,
    model: DataModel,
) -> Result<Vec<Probe>, ModelError> {
    let scalar = classify(code, model)?;
    let range = i128::from(range);

    let integer = match original {
        Probe::Signed(x) => Some(i128::from(x)),
        Probe::Unsigned(x) => Some(i128::from(x)),
        Probe::Char(x) => Some(i128::from(x)),
        Probe::Float(..) | Probe::Pointer(..) => None,
    };

    match (scalar, integer) {
        (Scalar::Pointer, _) => Ok(Vec::new()),
        (Scalar::Char, _) => {
            let c = match original {
                Probe::Char(c) => c,
                _ => return Err(bad_value(code, &original)),
            };
            let values = if c.is_ascii_digit() {
                vec![b'a', b'Z']
            } else {
                vec![b'0', b'9', swap_case(c)]
            };
            Ok(dedup(values.into_iter().map(Probe::Char).collect()))
        }
        (Scalar::Signed { min, max }, Some(x)) => {
            let mut values: BTreeSet<_> = (1..=range).flat_map(|d| vec![x + d, x - d]).collect();
            values.insert(-x);
            for &e in &[x.div_euclid(2), x.div_euclid(4), x * 2, x * 4] {
                values.insert(e);
                values.insert(-e);
            }
            Ok(integers(values, min, max, true))
        }
        (Scalar::Unsigned { max }, Some(x)) => {
            let mut values: BTreeSet<_> = (1..=range).flat_map(|d| vec![x + d, x - d]).collect();
            values.extend(vec![x / 2, x / 4, x * 2, x * 4]);
            Ok(integers(values, 0, max, false))
        }
        (Scalar::Float { max, .. }, _) => {
            let x = match original {
                Probe::Float(x) => x,
                Probe::Signed(x) => x as f64,
                Probe::Unsigned(x) => x as f64,
                _ => return Err(bad_value(code, &original)),
            };
            let mut values = Vec::new();
            for d in 1..=range {
                values.push(x + d as f64);
                values.push(x - d as f64);
            }
            for &e in &[x / 2.0, x / 3.0, x / 4.0, x * 2.0, x * 3.0, x * 4.0] {
                values.push(e);
                values.push(-e);
            }
            Ok(dedup(
                values
                    .into_iter()
                    .filter(|x| x.is_finite() && x.abs() <= max)
                    .map(Probe::Float)
                    .collect(),
            ))
        }
        _ => Err(bad_value(code, &original)),
    }
}

/// `count` values drawn uniformly from the range of `code`. Characters stay
/// within ASCII and floats within the magnitude of `f32`.
pub fn random<R: Rng>(
    code: &str,
    count: usize,
    rng: &mut R,
    model: DataModel,
) -> Result<Vec<Probe>, ModelError> {
    let scalar = classify(code, model)?;
    if scalar == Scalar::Pointer {
        return Ok(Vec::new());
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match scalar {
            Scalar::Pointer => continue,
            Scalar::Char => Probe::Char(rng.random_range(0..=127)),
            Scalar::Signed { min, max } => Probe::Signed(rng.random_range(min as i64..=max as i64)),
            Scalar::Unsigned { max } => Probe::Unsigned(rng.random_range(0..=max as u64)),
            Scalar::Float { .. } => {
                let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
                Probe::Float(rng.random::<f64>() * f64::from(f32::MAX) * sign)
            }
        };
        values.push(value);
    }
    Ok(dedup(values))
}

/// Parse `text` as a value of format code `code`: a number, or for `c` a
/// single character.
pub fn parse_value(code: &str, text: &str, model: DataModel) -> Result<Probe, ModelError> {
    let bad = || ModelError::BadValue {
        code: code.to_owned(),
        value: text.to_owned(),
    };

    match classify(code, model)? {
        Scalar::Char => {
            if let [c] = text.as_bytes() {
                Ok(Probe::Char(*c))
            } else {
                text.parse().map(Probe::Char).map_err(|_| bad())
            }
        }
        Scalar::Signed { .. } => text.parse().map(Probe::Signed).map_err(|_| bad()),
        Scalar::Unsigned { .. } => text.parse().map(Probe::Unsigned).map_err(|_| bad()),
        Scalar::Float { .. } => text.parse().map(Probe::Float).map_err(|_| bad()),
        Scalar::Pointer => {
            let parsed = if text.starts_with("0x") {
                u64::from_str_radix(&text[2..], 16)
            } else {
                text.parse()
            };
            parsed.map(Probe::Pointer).map_err(|_| bad())
        }
    }
}

/// Which of the three generators contribute values.
#[derive(Debug)]
pub struct Generator<R = StdRng> {
    data_model: DataModel,
    heuristic: bool,
    mutate_range: u32,
    random_cases: usize,
    rng: R,
}

impl Generator<StdRng> {
    /// Heuristic values only, until configured otherwise.
    pub fn new(data_model: DataModel) -> Generator<StdRng> {
        Generator {
            data_model,
            heuristic: true,
            mutate_range: MUTATE_RANGE,
            random_cases: 0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Draw random values from a generator seeded with `seed`.
    pub fn seed(self, seed: u64) -> Generator<StdRng> {
        self.with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Generator<R> {
    pub fn with_rng<S: Rng>(self, rng: S) -> Generator<S> {
        Generator {
            data_model: self.data_model,
            heuristic: self.heuristic,
            mutate_range: self.mutate_range,
            random_cases: self.random_cases,
            rng,
        }
    }

    pub fn heuristic(mut self, enabled: bool) -> Self {
        self.heuristic = enabled;
        self
    }

    pub fn mutate_range(mut self, range: u32) -> Self {
        self.mutate_range = range;
        self
    }

    pub fn random_cases(mut self, count: usize) -> Self {
        self.random_cases = count;
        self
    }

    /// Values for `code`, mutating `original` when one is given.
    pub fn generate(&mut self, code: &str, original: Option<Probe>) -> Result<Vec<Probe>, ModelError> {
        classify(code, self.data_model)?;

        let mut values = Vec::new();
        if let Some(original) = original {
            values.extend(mutational(code, original, self.mutate_range, self.data_model)?);
        }
        if self.heuristic {
            values.extend(heuristic(code, self.data_model)?);
        }
        if self.random_cases > 0 {
            values.extend(random(code, self.random_cases, &mut self.rng, self.data_model)?);
        }
        Ok(dedup(values))
    }

    fn param(
        &mut self,
        model: &Model,
        code: &str,
        originals: &mut dyn Iterator<Item = &Probe>,
    ) -> Result<ParamProbes, ModelError> {
        if let Ok(id) = code.parse::<u32>() {
            let usertype = model
                .usertype(id)
                .ok_or(ModelError::UnknownUserType(id))?;
            let members = usertype
                .params
                .iter()
                .map(|member| self.param(model, member, originals))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ParamProbes {
                code: code.to_owned(),
                values: Vec::new(),
                members,
            });
        }

        let original = originals.next().cloned();
        Ok(ParamProbes {
            code: code.to_owned(),
            values: self.generate(code, original)?,
            members: Vec::new(),
        })
    }

    /// Values for every parameter of the export called `name`. `originals`
    /// are known good values for the scalar parameters, composites
    /// flattened member by member, and are mutated in that order.
    pub fn for_function(
        &mut self,
        model: &Model,
        name: &str,
        originals: &[Probe],
    ) -> Result<Vec<ParamProbes>, ModelError> {
        let function = model
            .function(name)
            .ok_or_else(|| ModelError::UnknownFunction(name.to_owned()))?;

        let mut originals = originals.iter();
        function
            .params
            .iter()
            .map(|code| self.param(model, code, &mut originals))
            .collect()
    }
}

fn collect_scalars(model: &Model, code: &str, codes: &mut Vec<String>) -> Result<(), ModelError> {
    match code.parse::<u32>() {
        Ok(id) => {
            let usertype = model
                .usertype(id)
                .ok_or(ModelError::UnknownUserType(id))?;
            for member in &usertype.params {
                collect_scalars(model, member, codes)?;
            }
        }
        Err(..) => codes.push(code.to_owned()),
    }
    Ok(())
}

/// Format codes of the scalar parameters of the export called `name`, in the
/// order `Generator::for_function` consumes known good values.
pub fn scalar_codes(model: &Model, name: &str) -> Result<Vec<String>, ModelError> {
    let function = model
        .function(name)
        .ok_or_else(|| ModelError::UnknownFunction(name.to_owned()))?;

    let mut codes = Vec::new();
    for code in &function.params {
        collect_scalars(model, code, &mut codes)?;
    }
    Ok(codes)
}

/// Heuristic values for every parameter of the export called `name`.
pub fn for_function(
    model: &Model,
    name: &str,
    data_model: DataModel,
) -> Result<Vec<ParamProbes>, ModelError> {
    Generator::new(data_model).for_function(model, name, &[])
}
