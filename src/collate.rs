//! ICU collation sort keys.
//!
//! Keys are ordered and looked up by ICU binary sort keys, never by code
//! points.  The writer persists refs in IDENTICAL-strength order; readers
//! may search at any weaker strength because, with SHIFTED alternate
//! handling applied consistently, IDENTICAL order refines every weaker
//! order.
//!
//! Collator construction is expensive, so generators are memoized
//! process-wide by `(strength, max_length)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rust_icu_sys as sys;
use rust_icu_ucol as ucol;
use rust_icu_ustring as ustring;

use crate::error::{Result, SlobError};

/// ICU collation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    /// Base letters only: case, accents, and (shifted) punctuation are
    /// ignorable.
    Primary,
    /// Primary plus accents.
    Secondary,
    /// Secondary plus case.
    Tertiary,
    /// Tertiary plus punctuation and whitespace (shifted variants).
    Quaternary,
    /// Full code point order tie-break.
    Identical,
}

impl Strength {
    fn to_icu(self) -> sys::UCollationStrength {
        match self {
            Strength::Primary => sys::UCollationStrength::UCOL_PRIMARY,
            Strength::Secondary => sys::UCollationStrength::UCOL_SECONDARY,
            Strength::Tertiary => sys::UCollationStrength::UCOL_TERTIARY,
            Strength::Quaternary => sys::UCollationStrength::UCOL_QUATERNARY,
            Strength::Identical => sys::UCollationStrength::UCOL_IDENTICAL,
        }
    }
}

/// A configured collator producing binary sort keys, optionally truncated
/// to `max_length` bytes.
pub struct SortKeyGen {
    collator: Mutex<ucol::UCollator>,
    max_length: Option<usize>,
}

// Safety: the ICU collator handle is confined behind the mutex; every call
// that touches it holds the lock for the whole FFI round trip.
unsafe impl Send for SortKeyGen {}
unsafe impl Sync for SortKeyGen {}

impl SortKeyGen {
    fn new(strength: Strength, max_length: Option<usize>) -> Result<Self> {
        let mut collator =
            ucol::UCollator::try_from("").map_err(|e| SlobError::Collator(e.to_string()))?;
        collator.set_strength(strength.to_icu());
        collator
            .set_attribute(
                sys::UColAttribute::UCOL_ALTERNATE_HANDLING,
                sys::UColAttributeValue::UCOL_SHIFTED,
            )
            .map_err(|e| SlobError::Collator(e.to_string()))?;
        Ok(Self { collator: Mutex::new(collator), max_length })
    }

    pub fn sort_key(&self, text: &str) -> Result<Vec<u8>> {
        let text =
            ustring::UChar::try_from(text).map_err(|e| SlobError::Collator(e.to_string()))?;
        let mut key = self.collator.lock().unwrap().get_sort_key(&text);
        if let Some(max_length) = self.max_length {
            key.truncate(max_length);
        }
        Ok(key)
    }
}

static GENERATORS: Lazy<Mutex<HashMap<(Strength, Option<usize>), Arc<SortKeyGen>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch (or lazily build) the process-wide sort key generator for the
/// given strength and truncation length.
pub fn sort_key_gen(strength: Strength, max_length: Option<usize>) -> Result<Arc<SortKeyGen>> {
    let mut generators = GENERATORS.lock().unwrap();
    if let Some(generator) = generators.get(&(strength, max_length)) {
        return Ok(Arc::clone(generator));
    }
    let generator = Arc::new(SortKeyGen::new(strength, max_length)?);
    generators.insert((strength, max_length), Arc::clone(&generator));
    Ok(generator)
}
