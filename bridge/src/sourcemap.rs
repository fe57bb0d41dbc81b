use wire::types::SourceLocation;

/// Seam for the position-translation collaborator. Implementations mutate
/// the location in place and report whether a mapping was found; a `false`
/// return leaves the location untouched.
pub trait SourceMapper: Send + Sync {
    /// Rewrite a generated-code location to its original source.
    fn map_to_source(&self, location: &mut SourceLocation) -> bool;

    /// Rewrite an original-source location to its generated-code position.
    fn map_from_source(&self, location: &mut SourceLocation) -> bool;
}

/// Mapper for programs that run unmodified source.
pub struct IdentityMapper;

impl SourceMapper for IdentityMapper {
    fn map_to_source(&self, _location: &mut SourceLocation) -> bool {
        false
    }

    fn map_from_source(&self, _location: &mut SourceLocation) -> bool {
        false
    }
}
