//! Password entries.

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// A fully loaded password entry (pass-store layout).
///
/// Secret fields are held in `SecretString`, so they are zeroized when
/// dropped and redacted in `Debug` output.
#[derive(Debug)]
pub struct Password {
    /// Display name of the entry.
    pub name: String,

    /// Path of the entry's file in the store.
    pub path: PathBuf,

    password: SecretString,

    pub username: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,

    otp_secret: Option<SecretString>,
}

impl Password {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            password: SecretString::from(password.into()),
            username: None,
            url: None,
            notes: None,
            otp_secret: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_otp_secret(mut self, secret: impl Into<String>) -> Self {
        self.otp_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    pub fn otp_secret(&self) -> Option<&str> {
        self.otp_secret.as_ref().map(|s| s.expose_secret())
    }

    /// Wipe the sensitive fields and keep the rest.
    ///
    /// Call as soon as the secret is no longer shown. An OTP secret that was
    /// present stays present but empty.
    pub fn clear(&mut self) {
        self.password = SecretString::from(String::new());
        if let Some(otp) = self.otp_secret.as_mut() {
            *otp = SecretString::from(String::new());
        }
    }

    /// Serializable view without any secret field.
    pub fn summary(&self) -> PasswordSummary {
        PasswordSummary {
            name: self.name.clone(),
            path: self.path.display().to_string(),
            username: self.username.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
        }
    }

    /// Lightweight list record for this entry.
    pub fn entry(&self) -> PasswordEntry {
        let subtitle = self.username.clone().or_else(|| self.url.clone());
        PasswordEntry {
            name: self.name.clone(),
            path: self.path.clone(),
            subtitle,
        }
    }
}

/// Non-sensitive fields of a [`Password`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordSummary {
    pub name: String,
    pub path: String,
    pub username: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
}

/// What the password list shows. The full [`Password`] is loaded only
/// when an entry is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEntry {
    pub name: String,
    pub path: PathBuf,
    /// Username, URL, or nothing (the path is shown instead).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

impl PasswordEntry {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            subtitle: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

impl fmt::Display for PasswordEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtitle {
            Some(subtitle) => write!(f, "{} ({})", self.name, subtitle),
            None => write!(f, "{} ({})", self.name, self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_keeps_all_fields() {
        let password = Password::new(
            "Test Password",
            "/home/user/.password-store/test.gpg",
            "secret123",
        )
        .with_username("testuser")
        .with_url("https://example.com")
        .with_notes("Test notes");

        assert_eq!(password.name, "Test Password");
        assert_eq!(password.password(), "secret123");
        assert_eq!(password.username.as_deref(), Some("testuser"));
        assert_eq!(password.otp_secret(), None);
    }

    #[test]
    fn clear_wipes_only_secrets() {
        let mut password =
            Password::new("Test", "/test.gpg", "secret123").with_otp_secret("JBSWY3DPEHPK3PXP");

        password.clear();

        assert_eq!(password.password(), "");
        assert_eq!(password.otp_secret(), Some(""));
        assert_eq!(password.name, "Test");
    }

    #[test]
    fn clear_without_otp_leaves_it_absent() {
        let mut password = Password::new("Test", "/test.gpg", "secret123");
        password.clear();
        assert_eq!(password.otp_secret(), None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let password = Password::new("Test", "/test.gpg", "hunter2").with_otp_secret("JBSW");
        let shown = format!("{password:?}");
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("JBSW"));
    }

    #[test]
    fn summary_excludes_secrets() {
        let password = Password::new("Test", "/test.gpg", "secret")
            .with_username("user")
            .with_otp_secret("JBSWY3DPEHPK3PXP");

        let value = serde_json::to_value(password.summary()).unwrap();
        assert_eq!(value["name"], "Test");
        assert_eq!(value["path"], "/test.gpg");
        assert_eq!(value["username"], "user");
        assert!(value.get("password").is_none());
        assert!(value.get("otp_secret").is_none());
    }

    #[test]
    fn entry_display_prefers_subtitle() {
        let entry = PasswordEntry::new("GitHub", "/github.gpg").with_subtitle("user@example.com");
        assert_eq!(entry.to_string(), "GitHub (user@example.com)");

        let bare = PasswordEntry::new("Test", "/test.gpg");
        assert_eq!(bare.to_string(), "Test (/test.gpg)");
    }

    #[test]
    fn entry_from_password_uses_username_then_url() {
        let with_user = Password::new("a", "/a.gpg", "x").with_username("alice");
        assert_eq!(with_user.entry().subtitle.as_deref(), Some("alice"));

        let with_url = Password::new("b", "/b.gpg", "x").with_url("https://b.example");
        assert_eq!(with_url.entry().subtitle.as_deref(), Some("https://b.example"));
    }
}
