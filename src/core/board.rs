//! Board Snapshots and Patch Algebra
//!
//! A [`Board`] is an open JSON object that always carries a string `phase`.
//! A [`Patch`] is a partial board. Applying a patch is a shallow merge in
//! which the patch's fields win; nested values are replaced, never merged.
//!
//! Boards are immutable values: every merge produces a new board.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name of the phase discriminator.
pub const PHASE_KEY: &str = "phase";

/// Raw field map shared by boards and patches.
pub type Fields = Map<String, Value>;

/// Errors raised when building boards or patches from raw fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Board has no `phase` field.
    #[error("board is missing a `phase` field")]
    MissingPhase,

    /// `phase` is present but not a string.
    #[error("`phase` must be a string")]
    InvalidPhase,
}

fn check_phase(fields: &Fields, required: bool) -> Result<(), BoardError> {
    match fields.get(PHASE_KEY) {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(BoardError::InvalidPhase),
        None if required => Err(BoardError::MissingPhase),
        None => Ok(()),
    }
}

/// One consistent game snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields", into = "Fields")]
pub struct Board(Fields);

impl Board {
    /// Create a board holding only a phase.
    pub fn new(phase: impl Into<String>) -> Self {
        let mut fields = Fields::new();
        fields.insert(PHASE_KEY.to_string(), Value::String(phase.into()));
        Self(fields)
    }

    /// Builder-style field insertion.
    ///
    /// A non-string value for `phase` is ignored.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if key == PHASE_KEY && !value.is_string() {
            return self;
        }
        self.0.insert(key.to_string(), value);
        self
    }

    /// Current phase.
    pub fn phase(&self) -> &str {
        self.0.get(PHASE_KEY).and_then(Value::as_str).unwrap_or_default()
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Typed field lookup. Returns `None` if absent or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Shallow merge: a new board with `patch`'s fields laid over this one.
    pub fn merge(&self, patch: &Patch) -> Board {
        let mut fields = self.0.clone();
        for (key, value) in patch.fields() {
            fields.insert(key.clone(), value.clone());
        }
        Board(fields)
    }

    /// A board is also a (complete) patch.
    pub fn to_patch(&self) -> Patch {
        Patch(self.0.clone())
    }

    /// Promote a patch to a board if it carries a phase.
    pub fn try_from_patch(patch: Patch) -> Result<Self, BoardError> {
        Board::try_from(patch.0)
    }
}

impl TryFrom<Fields> for Board {
    type Error = BoardError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        check_phase(&fields, true)?;
        Ok(Self(fields))
    }
}

impl From<Board> for Fields {
    fn from(board: Board) -> Self {
        board.0
    }
}

/// A partial board: one incremental delta.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields", into = "Fields")]
pub struct Patch(Fields);

impl Patch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only moves the phase.
    pub fn phase(phase: impl Into<String>) -> Self {
        Self::new().with(PHASE_KEY, Value::String(phase.into()))
    }

    /// Builder-style field insertion. A non-string `phase` is ignored.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if key == PHASE_KEY && !value.is_string() {
            return self;
        }
        self.0.insert(key.to_string(), value);
        self
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Typed field lookup.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lay `other`'s fields over this patch.
    pub fn merge(&self, other: &Patch) -> Patch {
        let mut fields = self.0.clone();
        for (key, value) in other.fields() {
            fields.insert(key.clone(), value.clone());
        }
        Patch(fields)
    }
}

impl TryFrom<Fields> for Patch {
    type Error = BoardError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        check_phase(&fields, false)?;
        Ok(Self(fields))
    }
}

impl From<Patch> for Fields {
    fn from(patch: Patch) -> Self {
        patch.0
    }
}

/// Reconstruct the board sequence produced by `patches` starting at `base`.
///
/// `result[i]` is `result[i - 1]` (or `base` when `i == 0`) merged with
/// `patches[i]`. Empty input yields an empty sequence.
pub fn apply_patches(base: &Board, patches: &[Patch]) -> Vec<Board> {
    let mut boards: Vec<Board> = Vec::with_capacity(patches.len());
    for patch in patches {
        let prior = boards.last().unwrap_or(base);
        let next = prior.merge(patch);
        boards.push(next);
    }
    boards
}
