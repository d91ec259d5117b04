//! Shader Macro Definitions
//!
//! An ordered set of preprocessor defines handed to every compiler
//! invocation of a backend and to map reflection. Entries are kept sorted by
//! key so that two sets with the same contents produce the same argument
//! list and fingerprint.
//!
//! ```rust,ignore
//! use ngfx_shaders::ShaderDefines;
//!
//! let mut defines = ShaderDefines::new();
//! defines.set("GRAPHICS_BACKEND_METAL", "1");
//! assert_eq!(defines.to_args(), ["-DGRAPHICS_BACKEND_METAL=1"]);
//! ```

use crate::fingerprint::Fingerprint;

/// A collection of shader macro definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDefines {
    defines: Vec<(String, String)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            defines: Vec::with_capacity(capacity),
        }
    }

    /// Set shader define (maintains sorted order)
    ///
    /// If key exists, updates its value; otherwise inserts new entry.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(idx) => value.clone_into(&mut self.defines[idx].1),
            Err(idx) => self.defines.insert(idx, (key.to_owned(), value.to_owned())),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if let Ok(idx) = self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            self.defines.remove(idx);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compiler arguments, `-DKEY=VALUE` (or `-DKEY` for an empty value).
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.defines
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    format!("-D{k}")
                } else {
                    format!("-D{k}={v}")
                }
            })
            .collect()
    }

    /// Content digest; part of every artifact key.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut bytes = Vec::new();
        for (key, value) in &self.defines {
            bytes.extend_from_slice(key.as_bytes());
            bytes.push(b'=');
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        Fingerprint::of(&bytes)
    }
}

/// Create `ShaderDefines` from list of macro definitions
impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::with_capacity(defines.len());
        for (k, v) in defines {
            result.set(k, v);
        }
        result
    }
}
