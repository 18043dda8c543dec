use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("both the entity code and the password are required")]
    MissingFields,
    #[error("the entity code must contain only digits")]
    NonNumericCode,
    #[error("the entity code must have at least 2 digits")]
    CodeTooShort,
    #[error("entity code not found")]
    UnknownCode,
    #[error("wrong password")]
    WrongSecret,
}

/// Who logged in. The master secret opens any entity but is kept apart from
/// ordinary entity logins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Entity { code: String },
    Master { code: String },
}

impl Principal {
    pub fn code(&self) -> &str {
        match self {
            Principal::Entity { code } | Principal::Master { code } => code,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Principal::Master { .. })
    }
}

#[derive(Debug, Deserialize)]
struct MasterSection {
    password: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    master: Option<MasterSection>,
    #[serde(default)]
    regionais: BTreeMap<String, String>,
    #[serde(default)]
    municipios: BTreeMap<String, String>,
    #[serde(default)]
    escolas: BTreeMap<String, String>,
    #[serde(default)]
    names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    secrets: HashMap<String, String>,
    names: HashMap<String, String>,
    master: Option<String>,
}

impl CredentialStore {
    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read credentials file: {}", file_path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid credentials file: {}", file_path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CredentialsFile = toml::from_str(content)?;
        let mut store = CredentialStore {
            master: file.master.map(|m| m.password).filter(|p| !p.is_empty()),
            ..Default::default()
        };

        let sections = [
            (file.regionais, "Regional"),
            (file.municipios, "Município"),
            (file.escolas, "Escola"),
        ];
        for (section, prefix) in sections {
            for (code, secret) in section {
                store.names.insert(code.clone(), format!("{} {}", prefix, code));
                store.secrets.insert(code, secret);
            }
        }
        store.names.extend(file.names);

        if store.secrets.is_empty() {
            anyhow::bail!("no credentials found");
        }
        Ok(store)
    }

    /// True when `secret` is the entity's own secret or the master secret.
    pub fn authenticate(&self, code: &str, secret: &str) -> bool {
        self.is_master_secret(secret)
            || self.secrets.get(code.trim()).is_some_and(|expected| expected == secret)
    }

    fn is_master_secret(&self, secret: &str) -> bool {
        self.master.as_deref() == Some(secret)
    }

    /// Check a login attempt, reporting the first rule it breaks.
    pub fn login(&self, code: &str, secret: &str) -> Result<Principal, LoginError> {
        let code = code.trim();
        if code.is_empty() || secret.is_empty() {
            return Err(LoginError::MissingFields);
        }
        validate_entity_code(code)?;

        if self.is_master_secret(secret) {
            return Ok(Principal::Master {
                code: code.to_string(),
            });
        }
        if !self.secrets.contains_key(code) {
            return Err(LoginError::UnknownCode);
        }
        if !self.authenticate(code, secret) {
            return Err(LoginError::WrongSecret);
        }
        Ok(Principal::Entity {
            code: code.to_string(),
        })
    }

    pub fn display_name(&self, code: &str) -> String {
        self.names
            .get(code)
            .cloned()
            .unwrap_or_else(|| format!("Entidade {}", code))
    }
}

pub fn validate_entity_code(code: &str) -> Result<(), LoginError> {
    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(LoginError::NonNumericCode);
    }
    if code.len() < 2 {
        return Err(LoginError::CodeTooShort);
    }
    Ok(())
}
