//! Serializer configuration: deserialization strategy, offset width, file
//! identifier and traversal specialization.
//!
//! Strategy-specific behavior is not scattered through the type machinery
//! as mode switches. Instead, every parse call carries one
//! [`SerializerOptions`] and the machinery asks capability questions:
//! "does this configuration memoize fields?", "does it preallocate
//! vectors?", "does it permit write-through?". The capability accessors
//! below are the single source of truth for those answers.

use crate::buffer::OffsetWidth;
use crate::constants::FILE_IDENTIFIER_LEN;

/// The five-plus-one mutually exclusive deserialization strategies.
///
/// Selected once per parse call; each mode trades materialization cost
/// against access cost and mutability:
///
/// | Mode | Fields | Mutable | Write-through | Vectors cached |
/// |---|---|---|---|---|
/// | `Lazy` | re-read on every access | no | yes | no |
/// | `PropertyCache` | memoized on first access | no | no | no |
/// | `Greedy` | fully materialized at parse | no | no | yes |
/// | `GreedyMutable` | fully materialized at parse | yes (in-memory) | no | yes |
/// | `VectorCache` | memoized; vectors copied at first touch | no | no | yes |
/// | `VectorCacheMutable` | memoized; vectors copied at first touch | yes (in-memory) | no | yes |
///
/// Under every mode, reading the same field of the same parsed instance
/// twice without an intervening mutation yields equal values. Only `Lazy`
/// patches the backing buffer; all other mutations live in the in-memory
/// copy and are never flushed back automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeserializationMode {
    /// Every access re-reads the buffer. The only mode supporting
    /// write-through scalar mutation.
    #[default]
    Lazy,
    /// First access reads the buffer; the result is memoized in the view.
    PropertyCache,
    /// The entire graph is materialized at parse time; the result owns no
    /// buffer reference and may outlive it.
    Greedy,
    /// Like `Greedy`, but the returned graph may be mutated. Changes are
    /// visible only in the in-memory copy.
    GreedyMutable,
    /// Scalar and string fields behave like `PropertyCache`; vector
    /// elements are eagerly copied into owned sequences at first touch.
    VectorCache,
    /// Like `VectorCache`, but the memoized graph (including cached
    /// vectors) may be mutated in memory.
    VectorCacheMutable,
}

/// Configuration for one serializer instance.
///
/// Plain data; construct with [`SerializerOptions::new`] and the `with_*`
/// setters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerializerOptions {
    /// The active deserialization strategy.
    pub mode: DeserializationMode,
    /// Width of offset fields on the wire.
    pub offset_width: OffsetWidth,
    /// Optional file identifier written after the root offset.
    pub file_identifier: Option<[u8; FILE_IDENTIFIER_LEN]>,
    /// If true, a parse rejects buffers whose identifier does not match
    /// `file_identifier` with a `TypeMismatch` fault.
    pub strict_file_identifier: bool,
    /// Allow vector materialization to specialize its loop for fixed-width
    /// scalar elements. Throughput only; never changes observable results.
    pub devirtualize: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            mode: DeserializationMode::default(),
            offset_width: OffsetWidth::default(),
            file_identifier: None,
            strict_file_identifier: false,
            devirtualize: true,
        }
    }
}

impl SerializerOptions {
    /// Options for the given mode, everything else at defaults.
    pub fn new(mode: DeserializationMode) -> Self {
        Self { mode, ..Self::default() }
    }

    /// Sets the offset width.
    pub fn with_offset_width(mut self, width: OffsetWidth) -> Self {
        self.offset_width = width;
        self
    }

    /// Sets the file identifier. `strict` additionally enforces it on
    /// parse.
    pub fn with_file_identifier(mut self, id: [u8; FILE_IDENTIFIER_LEN], strict: bool) -> Self {
        self.file_identifier = Some(id);
        self.strict_file_identifier = strict;
        self
    }

    /// Disables the devirtualized vector traversal fast path.
    pub fn without_devirtualization(mut self) -> Self {
        self.devirtualize = false;
        self
    }

    // --- Capability accessors ---

    /// Fields are always read straight from the buffer.
    pub fn is_lazy(&self) -> bool {
        self.mode == DeserializationMode::Lazy
    }

    /// The whole graph is materialized at parse time.
    pub fn greedy_deserialize(&self) -> bool {
        matches!(
            self.mode,
            DeserializationMode::Greedy | DeserializationMode::GreedyMutable
        )
    }

    /// Field results are memoized per view. Lazy re-reads and greedy
    /// modes materialize up front, so neither needs the per-slot cache.
    pub fn property_cache(&self) -> bool {
        !self.is_lazy() && !self.greedy_deserialize()
    }

    /// Vector elements are copied into owned sequences rather than served
    /// from the buffer per access.
    pub fn preallocate_vectors(&self) -> bool {
        matches!(
            self.mode,
            DeserializationMode::VectorCache | DeserializationMode::VectorCacheMutable
        ) || self.greedy_deserialize()
    }

    /// The parsed object graph may be mutated (in memory only).
    pub fn generate_mutable_objects(&self) -> bool {
        matches!(
            self.mode,
            DeserializationMode::GreedyMutable | DeserializationMode::VectorCacheMutable
        )
    }

    /// Scalar field assignments patch the backing buffer in place.
    pub fn supports_write_through(&self) -> bool {
        self.is_lazy()
    }

    /// Bytes occupied by the buffer header: the root offset plus the file
    /// identifier, when one is configured.
    pub fn header_len(&self) -> usize {
        let id = if self.file_identifier.is_some() {
            FILE_IDENTIFIER_LEN
        } else {
            0
        };
        self.offset_width.bytes() + id
    }
}
