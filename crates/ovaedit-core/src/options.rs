//! Load and write options for [`Ovf`](crate::ovf::Ovf).

use std::path::PathBuf;

/// Options controlling how a package is loaded and written.
#[derive(Debug, Clone)]
pub struct OvfOptions {
    /// Check the manifest against the package contents on load.
    pub verify_manifest: bool,
    /// Treat a manifest mismatch as an error instead of a warning.
    pub fail_on_manifest_mismatch: bool,
    /// Where archive contents are staged when an archive is rewritten in place.
    /// Defaults to the system temporary directory.
    pub scratch_dir: Option<PathBuf>,
    /// Overrides the product class read from the descriptor when choosing
    /// the hardware platform.
    pub product_class: Option<String>,
}

impl Default for OvfOptions {
    fn default() -> Self {
        Self {
            verify_manifest: true,
            fail_on_manifest_mismatch: false,
            scratch_dir: None,
            product_class: None,
        }
    }
}

impl OvfOptions {
    /// Manifest problems are fatal.
    pub fn strict() -> Self {
        Self {
            fail_on_manifest_mismatch: true,
            ..Self::default()
        }
    }

    /// Skip manifest verification entirely.
    pub fn lenient() -> Self {
        Self {
            verify_manifest: false,
            ..Self::default()
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_product_class(mut self, class: impl Into<String>) -> Self {
        self.product_class = Some(class.into());
        self
    }

    pub fn with_manifest_verification(mut self, verify: bool) -> Self {
        self.verify_manifest = verify;
        self
    }
}

/// Stage of [`Ovf::write`](crate::ovf::Ovf::write), reported to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePhase {
    /// Copying archive members out before the archive is overwritten.
    Staging,
    /// Regenerating hardware and refreshing file metadata.
    Descriptor,
    /// Computing checksums.
    Manifest,
    /// Writing one referenced file.
    File(String),
    Done,
}

/// Progress callback for long writes.
pub type ProgressCallback<'a> = &'a dyn Fn(&WritePhase);
