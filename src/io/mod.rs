pub mod workspace;

pub use workspace::{load, save, save_data, Loaded, Workspace, WorkspaceItem, DNPDATA_KEY, NONE_SENTINEL};
