//! Error types for the core engine.

use crate::change::ChangeKind;
use entivc_storage::AdapterError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the core engine.
///
/// Validation errors leave the store and repository untouched. Integrity
/// errors abort the operation and leave the cached state untrusted; the
/// prescribed recovery is to re-open from the adapter. Protocol errors
/// abort only the failing operation. Adapter errors propagate unchanged;
/// the cache mirrors an update only after the adapter accepted it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempted to change the id of a live entity.
    #[error("the id of an entity is immutable: {entity_id}")]
    ImmutableId {
        /// The entity whose id was targeted.
        entity_id: String,
    },

    /// An entity names a type that was never registered.
    #[error("unknown entity type: {type_name}")]
    UnknownEntityType {
        /// The unregistered type name.
        type_name: String,
    },

    /// A type name was registered twice.
    #[error("entity type already registered: {type_name}")]
    DuplicateType {
        /// The colliding type name.
        type_name: String,
    },

    /// An entity was not found for update or removal.
    #[error("entity not found: {entity_id}")]
    EntityNotFound {
        /// The missing entity id.
        entity_id: String,
    },

    /// An entity with the same id is already present.
    #[error("duplicate entity id: {entity_id}")]
    DuplicateId {
        /// The colliding entity id.
        entity_id: String,
    },

    /// A unique index already holds an entry for the key.
    #[error("unique index '{index}' already holds key '{key}'")]
    UniqueIndexViolation {
        /// The index name.
        index: String,
        /// The colliding key.
        key: String,
    },

    /// Nested payload values exceed the supported depth.
    #[error("value nesting exceeds the supported depth of {max}")]
    DepthExceeded {
        /// The maximum supported depth.
        max: usize,
    },

    /// A serialized `type_name` holds something other than a string.
    #[error("entity type_name must be a string")]
    NonStringTypeName,

    /// A serialized entity or change is malformed.
    #[error("invalid entity data: {message}")]
    InvalidEntity {
        /// Description of the problem.
        message: String,
    },

    /// The store or repository configuration is unusable.
    #[error("configuration mismatch: {message}")]
    ConfigMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A computed snapshot hash differs from the recorded one.
    #[error("snapshot hash mismatch ({context}): expected {expected}, got {actual}")]
    HashMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// The recorded hash.
        expected: String,
        /// The computed hash.
        actual: String,
    },

    /// The hash tree holds a subtree whose parent never arrived.
    #[error("orphan subtree staged under missing parent '{parent_id}'")]
    OrphanSubtree {
        /// The missing parent entity id.
        parent_id: String,
    },

    /// A tombstoned tree node still has live children.
    #[error("removed entity '{entity_id}' still has live children")]
    TombstoneWithChildren {
        /// The tombstoned entity id.
        entity_id: String,
    },

    /// Two changes for one entity cannot follow each other.
    #[error("irrational change sequence for entity '{entity_id}': {first} then {next}")]
    IrrationalChange {
        /// The entity the changes target.
        entity_id: String,
        /// Kind of the first change.
        first: ChangeKind,
        /// Kind of the following change.
        next: ChangeKind,
    },

    /// Reset only supports stepping backwards.
    #[error("reset supports only negative offsets relative to head")]
    ResetForwardUnsupported,

    /// Reset would step past the first commit on the branch.
    #[error("reset past root: requested {requested} commits, branch has {available}")]
    ResetPastRoot {
        /// Commits requested to undo.
        requested: usize,
        /// Commits available on the branch.
        available: usize,
    },

    /// A required commit has no delta payload available.
    #[error("missing delta for commit '{commit_id}'")]
    MissingCommitDelta {
        /// The commit id lacking a payload.
        commit_id: String,
    },

    /// A named branch does not exist.
    #[error("missing branch: {name}")]
    MissingBranch {
        /// The missing branch name.
        name: String,
    },

    /// The operation violates the repository protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// A storage adapter call failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl CoreError {
    /// Creates an invalid-entity error.
    pub fn invalid_entity(message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            message: message.into(),
        }
    }

    /// Creates a configuration-mismatch error.
    pub fn config_mismatch(message: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a hash-mismatch error.
    pub fn hash_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
