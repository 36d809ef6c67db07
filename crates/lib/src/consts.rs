//! Crate-wide constants.

/// Application name, used for cache and config directory names.
pub const APP_NAME: &str = "reposerver";

/// Length of the truncated hex digest used for cache keys and checkout directories.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Maximum number of characters kept from a commit message before the ellipsis.
pub const REVISION_MESSAGE_MAX_LEN: usize = 61;

/// Marker appended to truncated commit messages.
pub const ELLIPSIS: &str = "...";

/// Environment variable carrying the application name for plugins.
pub const ENV_APP_NAME: &str = "REPOSERVER_APP_NAME";

/// Environment variable carrying the target namespace for plugins.
pub const ENV_APP_NAMESPACE: &str = "REPOSERVER_APP_NAMESPACE";

pub const ENV_GIT_ASKPASS: &str = "GIT_ASKPASS";
pub const ENV_GIT_USERNAME: &str = "GIT_USERNAME";
pub const ENV_GIT_PASSWORD: &str = "GIT_PASSWORD";

/// Kind of the Kubernetes list wrapper document.
pub const LIST_KIND: &str = "List";

/// Kind of resources that never receive the app instance label.
pub const CRD_KIND: &str = "CustomResourceDefinition";
