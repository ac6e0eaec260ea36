//! Callers are identified explicitly: every authenticated operation receives
//! an [`Identity`] resolved from the acting user's id. There is no ambient
//! "current user".

use crate::config::PasswordConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Hod, Role, Student, Teacher, User};
use crate::store;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

/// Role-specific record attached to a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", content = "profile", rename_all = "lowercase")]
pub enum Profile {
    Student(Student),
    Teacher(Teacher),
    Hod(Hod),
    Admin,
}

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user: User,
    #[serde(flatten)]
    pub profile: Profile,
}

impl Identity {
    pub fn role(&self) -> Role {
        match self.profile {
            Profile::Student(_) => Role::Student,
            Profile::Teacher(_) => Role::Teacher,
            Profile::Hod(_) => Role::Hod,
            Profile::Admin => Role::Admin,
        }
    }

    pub fn require_admin(&self) -> ServiceResult<()> {
        match self.profile {
            Profile::Admin => Ok(()),
            _ => Err(ServiceError::forbidden("admin role required")),
        }
    }
}

/// Argon2id hashing with optional pepper, configured from [`PasswordConfig`].
pub struct CredentialHasher {
    pepper: Option<Vec<u8>>,
    params: Params,
    // Verified against when the username is unknown, so both paths cost one hash.
    decoy_hash: String,
}

impl CredentialHasher {
    pub fn new(cfg: &PasswordConfig) -> ServiceResult<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| ServiceError::Internal(format!("invalid argon2 parameters: {}", e)))?;
        let mut hasher = Self {
            pepper: cfg.pepper.as_ref().map(|p| p.as_bytes().to_vec()),
            params,
            decoy_hash: String::new(),
        };
        hasher.decoy_hash = hasher.hash("srmsd-decoy-credential")?;
        Ok(hasher)
    }

    fn argon2(&self) -> ServiceResult<Argon2<'_>> {
        match &self.pepper {
            Some(secret) => Argon2::new_with_secret(
                secret,
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|e| ServiceError::Internal(format!("argon2 init failed: {}", e))),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    pub fn hash(&self, password: &str) -> ServiceResult<String> {
        let salt = SaltString::generate(&mut rand_core::OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ServiceError::Internal(format!("password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        let Ok(argon2) = self.argon2() else {
            return false;
        };
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    }
}

fn load_profile(conn: &Connection, user: &User) -> ServiceResult<Profile> {
    let missing = || ServiceError::not_found("role profile", user.id.clone());
    Ok(match user.role {
        Role::Student => Profile::Student(store::find_student_by_user(conn, &user.id)?.ok_or_else(missing)?),
        Role::Teacher => Profile::Teacher(store::find_teacher_by_user(conn, &user.id)?.ok_or_else(missing)?),
        Role::Hod => Profile::Hod(store::find_hod_by_user(conn, &user.id)?.ok_or_else(missing)?),
        Role::Admin => Profile::Admin,
    })
}

/// Resolve an acting user id into a full identity.
pub fn resolve(conn: &Connection, user_id: &str) -> ServiceResult<Identity> {
    let user = store::get_user(conn, user_id)?.ok_or_else(|| ServiceError::not_found("user", user_id))?;
    let profile = load_profile(conn, &user)?;
    Ok(Identity { user, profile })
}

/// Check a username/password pair for the requested role. Every failure is
/// reported as `InvalidCredentials`.
pub fn authenticate(
    conn: &Connection,
    hasher: &CredentialHasher,
    role: Role,
    username: &str,
    password: &str,
) -> ServiceResult<Identity> {
    let Some((user, stored_hash)) = store::find_user_by_username(conn, username.trim())? else {
        let _ = hasher.verify(password, &hasher.decoy_hash);
        warn!(username, "login failed: unknown user");
        return Err(ServiceError::InvalidCredentials);
    };
    let password_ok = hasher.verify(password, &stored_hash);
    if !password_ok || user.role != role {
        warn!(username, role = %role, "login failed");
        return Err(ServiceError::InvalidCredentials);
    }
    let profile = load_profile(conn, &user)?;
    info!(user_id = %user.id, role = %role, "login succeeded");
    Ok(Identity { user, profile })
}

#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub role: Role,
    pub full_name: &'a str,
    pub roll_number: Option<&'a str>,
    pub department_id: Option<&'a str>,
}

/// Create a user and their role record in one transaction.
pub fn register_user(
    conn: &Connection,
    hasher: &CredentialHasher,
    reg: &Registration<'_>,
) -> ServiceResult<Identity> {
    if reg.password.is_empty() {
        return Err(ServiceError::validation("password must not be empty"));
    }
    if reg.role == Role::Student && reg.roll_number.map(str::trim).unwrap_or("").is_empty() {
        return Err(ServiceError::validation("students require a roll number"));
    }
    let password_hash = hasher.hash(reg.password)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let identity = insert_identity(&tx, reg, &password_hash)?;
    tx.commit()?;

    info!(user_id = %identity.user.id, role = %identity.role(), "user registered");
    Ok(identity)
}

fn insert_identity(conn: &Connection, reg: &Registration<'_>, password_hash: &str) -> ServiceResult<Identity> {
    let user = store::insert_user(conn, reg.username, password_hash, reg.role)?;
    let profile = match reg.role {
        Role::Student => Profile::Student(store::insert_student(
            conn,
            &user.id,
            reg.roll_number.unwrap_or(""),
            reg.full_name,
            reg.department_id,
        )?),
        Role::Teacher => Profile::Teacher(store::insert_teacher(
            conn,
            &user.id,
            reg.full_name,
            reg.department_id,
        )?),
        Role::Hod => Profile::Hod(store::insert_hod(conn, &user.id, reg.full_name, reg.department_id)?),
        Role::Admin => Profile::Admin,
    };
    Ok(Identity { user, profile })
}

/// Create the first administrator. Fails with `Conflict` once any admin exists.
pub fn bootstrap_admin(
    conn: &Connection,
    hasher: &CredentialHasher,
    username: &str,
    password: &str,
) -> ServiceResult<Identity> {
    if password.is_empty() {
        return Err(ServiceError::validation("password must not be empty"));
    }
    let password_hash = hasher.hash(password)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if store::count_users_with_role(&tx, Role::Admin)? > 0 {
        return Err(ServiceError::Conflict("an admin already exists".to_string()));
    }
    let identity = insert_identity(
        &tx,
        &Registration {
            username,
            password,
            role: Role::Admin,
            full_name: "",
            roll_number: None,
            department_id: None,
        },
        &password_hash,
    )?;
    tx.commit()?;

    info!(user_id = %identity.user.id, "bootstrap admin created");
    Ok(identity)
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(&PasswordConfig {
        pepper: Some("test-pepper".to_string()),
        memory_kib: 8,
        iterations: 1,
    })
    .expect("hasher")
}
