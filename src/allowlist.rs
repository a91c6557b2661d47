//! Image allow-list.

const DEFAULT_REGISTRY: &str = "docker.io/";

/// Returns true when `candidate` may be used as a replacement image.
///
/// `repos` holds repository prefixes; a prefix covers all of its sub-paths.
/// An empty list, or an empty candidate, imposes no restriction.  The
/// default registry prefix is ignored on both sides.
pub fn is_image_allowed(repos: &[String], candidate: &str) -> bool {
    let candidate = strip_default_registry(candidate);
    if candidate.is_empty() || repos.is_empty() {
        return true;
    }
    repos
        .iter()
        .any(|repo| candidate.starts_with(strip_default_registry(repo)))
}

fn strip_default_registry(image: &str) -> &str {
    image.strip_prefix(DEFAULT_REGISTRY).unwrap_or(image)
}
