//! Staff directory: file-backed user records and credential verification.
//!
//! Records live in a single `staff.json` under the data root and are held in
//! memory behind a lock; every mutation rewrites the file. Password hashes use
//! Argon2 in PHC string format and never leave this module except inside
//! `StaffUser`, whose public projection strips them.

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::identity::{PublicStaff, Role};

/// Seeded on first run so an empty deployment can log in at all.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@brigade.local";
pub const DEFAULT_ADMIN_PASSWORD: &str = "brigade";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub password_hash: String,
    pub created_at: i64,
}

impl StaffUser {
    pub fn public(&self) -> PublicStaff {
        PublicStaff {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            active: self.active,
            phone_number: self.phone_number.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStaff {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: String,
    pub phone_number: Option<String>,
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

pub struct StaffDirectory {
    path: PathBuf,
    users: RwLock<HashMap<String, StaffUser>>,
}

impl StaffDirectory {
    /// Open (or start) the directory under the given data root.
    pub fn open<P: AsRef<Path>>(data_root: P) -> Result<Self> {
        let path = data_root.as_ref().join("staff.json");
        let users = if path.exists() {
            let raw = std::fs::read(&path)
                .with_context(|| format!("failed to read staff file: {}", path.display()))?;
            let list: Vec<StaffUser> = serde_json::from_slice(&raw)
                .with_context(|| format!("malformed staff file: {}", path.display()))?;
            list.into_iter().map(|u| (u.id.clone(), u)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self { path, users: RwLock::new(users) })
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Seed a default super admin when the directory has no users at all.
    pub fn ensure_default_admin(&self) -> Result<()> {
        if !self.is_empty() {
            return Ok(());
        }
        warn!(
            "staff directory is empty, seeding default admin '{}' (change its password)",
            DEFAULT_ADMIN_EMAIL
        );
        self.create(NewStaff {
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            name: "Default Admin".to_string(),
            role: Role::SuperAdmin,
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
            phone_number: None,
        })?;
        Ok(())
    }

    pub fn find_by_email(&self, email: &str) -> Option<StaffUser> {
        let users = self.users.read();
        users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<StaffUser> {
        self.users.read().get(id).cloned()
    }

    pub fn create(&self, new: NewStaff) -> Result<StaffUser> {
        let hash = hash_password(&new.password)?;
        let user = StaffUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: new.email,
            name: new.name,
            role: new.role,
            active: true,
            phone_number: new.phone_number,
            password_hash: hash,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        {
            let mut users = self.users.write();
            if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                return Err(anyhow!("email already registered: {}", user.email));
            }
            users.insert(user.id.clone(), user.clone());
        }
        self.persist()?;
        Ok(user)
    }

    /// Flip the active flag. Returns false if no such user exists.
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let found = {
            let mut users = self.users.write();
            match users.get_mut(id) {
                Some(u) => { u.active = active; true }
                None => false,
            }
        };
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let list: Vec<StaffUser> = self.users.read().values().cloned().collect();
        let raw = serde_json::to_vec_pretty(&list)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write staff file: {}", self.path.display()))?;
        Ok(())
    }
}
