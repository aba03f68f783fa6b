use thiserror::Error;

/// Any error raised by this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Version(#[from] crate::version::VersionError),

    #[error(transparent)]
    Resource(#[from] crate::resource::ResourceError),

    #[error(transparent)]
    Manifest(#[from] crate::metadata::ManifestError),

    #[error(transparent)]
    Hierarchy(#[from] crate::hierarchy::HierarchyError),

    #[error(transparent)]
    Decode(#[from] crate::decode::DecodeError),

    #[error(transparent)]
    Arena(#[from] crate::arena::ArenaError),

    #[error(transparent)]
    Open(#[from] crate::point_cloud::OpenError),

    #[error(transparent)]
    Load(#[from] crate::loader::LoadError),

    #[error(transparent)]
    Table(#[from] crate::lod::table::TableError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
