use anyhow::{Result, bail};

/// Validate a namespace name (RFC 1123 label).
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_namespace(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("namespace must not be empty");
    }
    if name.len() > 63 {
        bail!("namespace '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("namespace '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "namespace '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate an object name (RFC 1123 subdomain).
/// Rules: lowercase `[a-z0-9-.]`, max 253 chars, alphanumeric at both ends.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 253 {
        bail!("name '{}' exceeds 253 characters (got {})", name, name.len());
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(alnum) || !name.ends_with(alnum) {
        bail!(
            "name '{}' must start and end with a lowercase letter or digit",
            name
        );
    }
    if !name.chars().all(|c| alnum(c) || c == '-' || c == '.') {
        bail!(
            "name '{}' must contain only lowercase letters, digits, hyphens and dots [a-z0-9-.]",
            name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_namespaces() {
        assert!(validate_namespace("default").is_ok());
        assert!(validate_namespace("kube-system").is_ok());
        assert!(validate_namespace("a").is_ok());
    }

    #[test]
    fn invalid_namespaces() {
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("Kube-System").is_err());
        assert!(validate_namespace("my_ns").is_err());
        assert!(validate_namespace("-leading").is_err());
        assert!(validate_namespace("trailing-").is_err());
        assert!(validate_namespace("with.dot").is_err());
        assert!(validate_namespace(&"a".repeat(64)).is_err());
    }

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("applications.kobs.io").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name(".leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("special!char").is_err());
        assert!(validate_name(&"a".repeat(254)).is_err());
    }
}
