//! Opaque code and token generation.

/// Shortest code the engine will issue.
pub const MIN_CODE_SIZE: usize = 32;
/// Longest code the engine will issue.
pub const MAX_CODE_SIZE: usize = 128;

/// Produces fixed-length, unguessable alphanumeric strings.
///
/// Each output is cut from concatenated random (v4) UUIDs, so every
/// 32 characters carry 122 bits of entropy.
#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    size: usize,
}

impl CodeGenerator {
    /// `size` is clamped to `MIN_CODE_SIZE..=MAX_CODE_SIZE`.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size: size.clamp(MIN_CODE_SIZE, MAX_CODE_SIZE) }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Generate a new code, access token or refresh token.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut out = String::with_capacity(self.size + 32);
        while out.len() < self.size {
            out.push_str(&uuid::Uuid::new_v4().simple().to_string());
        }
        out.truncate(self.size);
        out
    }

    /// Does `candidate` have the shape of something this generator issues?
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.len() == self.size && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(crate::config::defaults::CODE_SIZE)
    }
}
