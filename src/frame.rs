//! Frames: immutable variable-binding environments, and the frame algebra.
//!
//! [`Frames`] is the ordered sequence a rule refines between matching and
//! dispatch. Every operation consumes a sequence and returns a new one;
//! absence ("no row", "no match") is expressed by dropping frames, never by
//! an error value.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::action::{ActionRef, Sequence};
use crate::concept::QuerySource;
use crate::error::SyncResult;
use crate::pattern::{Template, Var};
use crate::value::Value;

/// A binding environment plus the records that contributed to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    bindings: BTreeMap<Var, Value>,
    provenance: Vec<Sequence>,
}

impl Frame {
    /// An empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value bound to `var`.
    #[must_use]
    pub fn get(&self, var: &Var) -> Option<&Value> {
        self.bindings.get(var)
    }

    /// Whether `var` has a binding, `Null` included.
    #[must_use]
    pub fn is_bound(&self, var: &Var) -> bool {
        self.bindings.contains_key(var)
    }

    /// Returns a frame with `var` bound to `value`, replacing any binding.
    #[must_use]
    pub fn with(mut self, var: &Var, value: impl Into<Value>) -> Self {
        self.bindings.insert(var.clone(), value.into());
        self
    }

    /// Binds `var` if it is free; if bound, keeps the frame only when the
    /// existing value equals `value`.
    #[must_use]
    pub fn unify(self, var: &Var, value: Value) -> Option<Self> {
        match self.bindings.get(var) {
            Some(existing) if *existing == value => Some(self),
            Some(_) => None,
            None => Some(self.with(var, value)),
        }
    }

    /// Appends a contributing record to the provenance chain.
    #[must_use]
    pub fn with_provenance(mut self, sequence: Sequence) -> Self {
        if !self.provenance.contains(&sequence) {
            self.provenance.push(sequence);
        }
        self
    }

    /// All bindings, ordered by variable name.
    #[must_use]
    pub const fn bindings(&self) -> &BTreeMap<Var, Value> {
        &self.bindings
    }

    /// Records that contributed to the frame, in join order.
    #[must_use]
    pub fn provenance(&self) -> &[Sequence] {
        &self.provenance
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Canonical text of the bindings, used as a grouping/dedup key.
    fn key_of<'a>(entries: impl Iterator<Item = (&'a Var, &'a Value)>) -> String {
        let mut key = String::new();
        for (var, value) in entries {
            let _ = write!(key, "{}={};", var.name(), value.to_json());
        }
        key
    }

    fn binding_key(&self) -> String {
        Self::key_of(self.bindings.iter())
    }
}

/// An ordered sequence of frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frames(Vec<Frame>);

impl Frames {
    /// No frames.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding just `frame`.
    #[must_use]
    pub fn single(frame: Frame) -> Self {
        Self(vec![frame])
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no frame survived; an empty set fires nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates frames in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.0.iter()
    }

    /// The first frame, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Frame> {
        self.0.first()
    }

    /// Unwraps the frames.
    #[must_use]
    pub fn into_vec(self) -> Vec<Frame> {
        self.0
    }

    /// Inner join against a concept query.
    ///
    /// For each frame, `input` is instantiated and the query invoked; every
    /// result row that unifies with `output` yields one extended frame.
    /// A frame with no unifying row is dropped. Source order is preserved,
    /// rows keep the order the query returned them in.
    pub fn query(
        self,
        source: &dyn QuerySource,
        query: &ActionRef,
        input: &Template,
        output: &Template,
    ) -> SyncResult<Self> {
        let context = query.to_string();
        let mut out = Vec::with_capacity(self.0.len());
        for frame in self.0 {
            let args = input.substitute(&frame, &context)?;
            for row in source.query(query, &args)? {
                if let Some(joined) = output.unify(&row, &frame) {
                    out.push(joined);
                }
            }
        }
        Ok(Self(out))
    }

    /// Keeps the frames accepted by `keep`.
    #[must_use]
    pub fn filter(self, mut keep: impl FnMut(&Frame) -> bool) -> Self {
        Self(self.0.into_iter().filter(|f| keep(f)).collect())
    }

    /// Fallible variant of [`Frames::filter`].
    pub fn try_filter(self, mut keep: impl FnMut(&Frame) -> SyncResult<bool>) -> SyncResult<Self> {
        let mut out = Vec::with_capacity(self.0.len());
        for frame in self.0 {
            if keep(&frame)? {
                out.push(frame);
            }
        }
        Ok(Self(out))
    }

    /// Applies a pure per-frame transformation.
    #[must_use]
    pub fn map(self, f: impl FnMut(Frame) -> Frame) -> Self {
        Self(self.0.into_iter().map(f).collect())
    }

    /// Transformation that may drop frames.
    #[must_use]
    pub fn filter_map(self, f: impl FnMut(Frame) -> Option<Frame>) -> Self {
        Self(self.0.into_iter().filter_map(f).collect())
    }

    /// Groups frames by their bindings outside `group`.
    ///
    /// Each partition becomes one frame: the shared outer bindings plus
    /// `target` bound to the list of the members' `group` values. With one
    /// group variable the list holds its values; with several it holds
    /// records keyed by variable name. Partitions appear in first-encounter
    /// order and members keep their original order. An empty input yields
    /// an empty output; see [`Frames::collect_as_or`] for the fallback.
    #[must_use]
    pub fn collect_as(self, group: &[Var], target: &Var) -> Self {
        let mut partitions: Vec<(Frame, Vec<Value>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for frame in self.0 {
            let outer = frame
                .bindings
                .iter()
                .filter(|(v, _)| !group.contains(v) && *v != target);
            let key = Frame::key_of(outer);
            let member = Self::group_value(&frame, group);

            let slot = *index.entry(key).or_insert_with(|| {
                let base = Frame {
                    bindings: frame
                        .bindings
                        .iter()
                        .filter(|(v, _)| !group.contains(v) && *v != target)
                        .map(|(v, val)| (v.clone(), val.clone()))
                        .collect(),
                    provenance: Vec::new(),
                };
                partitions.push((base, Vec::new()));
                partitions.len() - 1
            });

            let (base, members) = &mut partitions[slot];
            for seq in frame.provenance {
                if !base.provenance.contains(&seq) {
                    base.provenance.push(seq);
                }
            }
            members.push(member);
        }

        Self(
            partitions
                .into_iter()
                .map(|(base, members)| base.with(target, Value::List(members)))
                .collect(),
        )
    }

    /// [`Frames::collect_as`] with an explicit base for the empty case:
    /// zero frames collapse to `fallback` with `target` bound to `[]`.
    #[must_use]
    pub fn collect_as_or(self, group: &[Var], target: &Var, fallback: &Frame) -> Self {
        if self.is_empty() {
            return Self::single(fallback.clone().with(target, Value::List(Vec::new())));
        }
        self.collect_as(group, target)
    }

    /// Removes frames whose bindings equal an earlier frame's.
    #[must_use]
    pub fn dedup(self) -> Self {
        let mut seen = std::collections::HashSet::new();
        Self(self.0.into_iter().filter(|f| seen.insert(f.binding_key())).collect())
    }

    fn group_value(frame: &Frame, group: &[Var]) -> Value {
        match group {
            [single] => frame.get(single).cloned().unwrap_or(Value::Null),
            many => Value::Record(
                many.iter()
                    .map(|v| (v.name().to_string(), frame.get(v).cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
        }
    }
}

impl From<Vec<Frame>> for Frames {
    fn from(frames: Vec<Frame>) -> Self {
        Self(frames)
    }
}

impl FromIterator<Frame> for Frames {
    fn from_iter<T: IntoIterator<Item = Frame>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Frames {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Frames {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
