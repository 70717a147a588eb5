use crate::config::{LookupError, RepositoryDescriptor};

/// Find the repository named `name`.
///
/// Names are case-sensitive. If a name is declared more than once the entry
/// with the lowest priority wins, and the first declared among equals.
///
/// # Errors
/// Returns [`LookupError::ConfigNotFound`] for an empty set and
/// [`LookupError::RepoNotFound`] when nothing matches.
pub fn find_repo<'a>(
    descriptors: &'a [RepositoryDescriptor],
    name: &str,
) -> Result<&'a RepositoryDescriptor, LookupError> {
    if descriptors.is_empty() {
        return Err(LookupError::ConfigNotFound(name.to_string()));
    }

    descriptors
        .iter()
        .filter(|repo| repo.name == name)
        .min_by_key(|repo| repo.priority)
        .ok_or_else(|| LookupError::RepoNotFound(name.to_string()))
}
