use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use super::entities::{
    Application, ApplicationStatus, ApprovalContext, Company, Credential, DeadLetter,
    InboundMessage, Profile, ProfileInput, Role, RoleInput, RoleStatus, role_unique_hash,
};
use super::error::{Result, StoreError};
use super::keys::{
    decode_id_value, decode_pref_key, encode_active_idx, encode_app_key, encode_company_key,
    encode_cred_key, encode_dead_letter_key, encode_hash_idx, encode_id_value, encode_inbound_key,
    encode_meta_key, encode_phone_idx, encode_pref_key, encode_pref_prefix, encode_profile_key,
    encode_role_key, normalize_company,
};
use super::machine::{self, Event};
use crate::crypto::CredentialCipher;

const META_PROFILE_SEQ: &str = "profile_seq";
const META_ROLE_SEQ: &str = "role_seq";
const META_APP_SEQ: &str = "app_seq";
const META_DL_SEQ: &str = "dead_letter_seq";
const META_INBOUND_SEQ: &str = "inbound_seq";
const META_PAUSED: &str = "paused";

/// Fjall-backed persistent storage for the application domain
pub struct AppStore {
    keyspace: Keyspace,
    profiles: PartitionHandle,
    preferences: PartitionHandle,
    credentials: PartitionHandle,
    companies: PartitionHandle,
    roles: PartitionHandle,
    applications: PartitionHandle,
    lookups: PartitionHandle,
    dead_letter: PartitionHandle,
    inbound: PartitionHandle,
    metadata: PartitionHandle,
    profile_seq: AtomicU64,
    role_seq: AtomicU64,
    app_seq: AtomicU64,
    dl_seq: AtomicU64,
    inbound_seq: AtomicU64,
    // Serializes the check-then-insert in create_or_reuse_application
    create_lock: Mutex<()>,
    // Row-level locks: one message at a time per application
    locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
}

impl AppStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening application store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let profiles = keyspace.open_partition("profiles", PartitionCreateOptions::default())?;
        let preferences =
            keyspace.open_partition("preferences", PartitionCreateOptions::default())?;
        let credentials =
            keyspace.open_partition("credentials", PartitionCreateOptions::default())?;
        let companies = keyspace.open_partition("companies", PartitionCreateOptions::default())?;
        let roles = keyspace.open_partition("roles", PartitionCreateOptions::default())?;
        let applications =
            keyspace.open_partition("applications", PartitionCreateOptions::default())?;
        let lookups = keyspace.open_partition("lookups", PartitionCreateOptions::default())?;
        let dead_letter =
            keyspace.open_partition("dead_letter", PartitionCreateOptions::default())?;
        let inbound = keyspace.open_partition("inbound", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let load_seq = |key: &str| -> Result<AtomicU64> {
            let value = metadata
                .get(encode_meta_key(key))?
                .and_then(|bytes| decode_id_value(&bytes))
                .unwrap_or(0);
            Ok(AtomicU64::new(value))
        };

        let profile_seq = load_seq(META_PROFILE_SEQ)?;
        let role_seq = load_seq(META_ROLE_SEQ)?;
        let app_seq = load_seq(META_APP_SEQ)?;
        let dl_seq = load_seq(META_DL_SEQ)?;
        let inbound_seq = load_seq(META_INBOUND_SEQ)?;

        info!("Application store opened");
        Ok(Self {
            keyspace,
            profiles,
            preferences,
            credentials,
            companies,
            roles,
            applications,
            lookups,
            dead_letter,
            inbound,
            metadata,
            profile_seq,
            role_seq,
            app_seq,
            dl_seq,
            inbound_seq,
            create_lock: Mutex::new(()),
            locks: DashMap::new(),
        })
    }

    fn alloc_id(&self, counter: &AtomicU64, meta_key: &str) -> Result<u64> {
        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.metadata
            .insert(encode_meta_key(meta_key), encode_id_value(id))?;
        Ok(id)
    }

    /// Row-level mutex for one application. Hold the guard across a
    /// load-transition-store sequence, never across external I/O.
    pub fn lock_application(&self, id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ---- profiles ----------------------------------------------------------

    /// Create or update a profile; the phone number is the natural key
    pub fn upsert_profile(&self, input: ProfileInput) -> Result<Profile> {
        let now = Utc::now();
        let existing = self.profile_by_phone(&input.phone)?;

        let profile = match existing {
            Some(mut profile) => {
                profile.full_name = input.full_name;
                profile.email = input.email;
                profile.headline = input.headline;
                profile.summary = input.summary;
                profile.updated_at = now;
                profile
            }
            None => Profile {
                id: self.alloc_id(&self.profile_seq, META_PROFILE_SEQ)?,
                full_name: input.full_name,
                email: input.email,
                phone: input.phone,
                headline: input.headline,
                summary: input.summary,
                created_at: now,
                updated_at: now,
            },
        };

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.profiles,
            encode_profile_key(profile.id),
            serde_json::to_vec(&profile)?,
        );
        batch.insert(
            &self.lookups,
            encode_phone_idx(&profile.phone),
            encode_id_value(profile.id),
        );
        batch.commit()?;

        debug!(profile_id = profile.id, "Upserted profile");
        Ok(profile)
    }

    pub fn profile(&self, id: u64) -> Result<Option<Profile>> {
        match self.profiles.get(encode_profile_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// The lowest-id profile; the single-user deployments this serves treat
    /// it as "the" user
    pub fn first_profile(&self) -> Result<Option<Profile>> {
        match self.profiles.iter().next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => Ok(None),
        }
    }

    pub fn profile_by_phone(&self, phone: &str) -> Result<Option<Profile>> {
        match self.lookups.get(encode_phone_idx(phone))? {
            Some(value) => match decode_id_value(&value) {
                Some(id) => self.profile(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn set_preference(&self, profile_id: u64, key: &str, value: &str) -> Result<()> {
        self.preferences
            .insert(encode_pref_key(profile_id, key), value.as_bytes())?;
        Ok(())
    }

    pub fn preferences(&self, profile_id: u64) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for item in self.preferences.prefix(encode_pref_prefix(profile_id)) {
            let (key, value) = item?;
            if let Some(name) = decode_pref_key(&key) {
                out.insert(name, String::from_utf8_lossy(&value).to_string());
            }
        }
        Ok(out)
    }

    // ---- credentials -------------------------------------------------------

    /// Seal and store a site credential. Unique per (profile, hostname).
    pub fn put_credential(
        &self,
        profile_id: u64,
        site_hostname: &str,
        username: &str,
        password: &str,
        cipher: &CredentialCipher,
    ) -> Result<()> {
        let credential = Credential {
            profile_id,
            site_hostname: site_hostname.trim().to_lowercase(),
            username: username.to_string(),
            ciphertext: cipher.seal(password.as_bytes())?,
            created_at: Utc::now(),
        };
        self.credentials.insert(
            encode_cred_key(profile_id, site_hostname),
            serde_json::to_vec(&credential)?,
        )?;
        debug!(profile_id, site_hostname, "Stored credential");
        Ok(())
    }

    /// Decrypt a stored credential. A failed open surfaces as a hard error,
    /// never as an empty password.
    pub fn decrypt_credential(
        &self,
        profile_id: u64,
        site_hostname: &str,
        cipher: &CredentialCipher,
    ) -> Result<Option<(String, String)>> {
        match self.credentials.get(encode_cred_key(profile_id, site_hostname))? {
            Some(value) => {
                let credential: Credential = serde_json::from_slice(&value)?;
                let password = cipher.open_string(&credential.ciphertext)?;
                Ok(Some((credential.username, password)))
            }
            None => Ok(None),
        }
    }

    // ---- companies and roles -----------------------------------------------

    /// Create or refresh a role by its dedup hash. A re-ingested role
    /// that was already ranked regresses to sourced so it gets re-scored.
    pub fn upsert_role(&self, input: RoleInput) -> Result<(Role, bool)> {
        let now = Utc::now();
        let normalized = normalize_company(&input.company);

        if self.companies.get(encode_company_key(&normalized))?.is_none() {
            let company = Company {
                name: input.company.trim().to_string(),
                created_at: now,
            };
            self.companies.insert(
                encode_company_key(&normalized),
                serde_json::to_vec(&company)?,
            )?;
        }

        let unique_hash = role_unique_hash(&input.company, &input.title);

        if let Some(value) = self.lookups.get(encode_hash_idx(&unique_hash))? {
            let id = decode_id_value(&value).ok_or(StoreError::Validation(
                "corrupt role hash index".to_string(),
            ))?;
            let mut role = self.role(id)?.ok_or(StoreError::NotFound {
                entity: "role",
                id,
            })?;

            role.description = input.description;
            role.posting_url = input.posting_url;
            if role.status == RoleStatus::Ranked {
                role.status = RoleStatus::Sourced;
                role.rank_score = None;
                role.rank_rationale = None;
            }
            role.updated_at = now;
            self.roles
                .insert(encode_role_key(role.id), serde_json::to_vec(&role)?)?;
            return Ok((role, false));
        }

        let role = Role {
            id: self.alloc_id(&self.role_seq, META_ROLE_SEQ)?,
            company: input.company.trim().to_string(),
            title: input.title.trim().to_string(),
            description: input.description,
            posting_url: input.posting_url,
            unique_hash: unique_hash.clone(),
            status: RoleStatus::Sourced,
            rank_score: None,
            rank_rationale: None,
            created_at: now,
            updated_at: now,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.roles,
            encode_role_key(role.id),
            serde_json::to_vec(&role)?,
        );
        batch.insert(
            &self.lookups,
            encode_hash_idx(&unique_hash),
            encode_id_value(role.id),
        );
        batch.commit()?;

        debug!(role_id = role.id, company = %role.company, title = %role.title, "Created role");
        Ok((role, true))
    }

    pub fn role(&self, id: u64) -> Result<Option<Role>> {
        match self.roles.get(encode_role_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn list_roles(&self, limit: usize) -> Result<Vec<Role>> {
        let mut out = Vec::new();
        for item in self.roles.iter().take(limit) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Record a rank score in [0.0, 1.0] and advance sourced → ranked
    pub fn set_role_rank(&self, role_id: u64, score: f64, rationale: &str) -> Result<Role> {
        if !(0.0..=1.0).contains(&score) {
            return Err(StoreError::Validation(format!(
                "rank score out of range: {score}"
            )));
        }
        let mut role = self.role(role_id)?.ok_or(StoreError::NotFound {
            entity: "role",
            id: role_id,
        })?;
        self.check_role_transition(&role, RoleStatus::Ranked)?;
        role.status = RoleStatus::Ranked;
        role.rank_score = Some(score);
        role.rank_rationale = Some(rationale.to_string());
        role.updated_at = Utc::now();
        self.roles
            .insert(encode_role_key(role.id), serde_json::to_vec(&role)?)?;
        Ok(role)
    }

    pub fn set_role_status(&self, role_id: u64, to: RoleStatus) -> Result<Role> {
        let mut role = self.role(role_id)?.ok_or(StoreError::NotFound {
            entity: "role",
            id: role_id,
        })?;
        self.check_role_transition(&role, to)?;
        role.status = to;
        role.updated_at = Utc::now();
        self.roles
            .insert(encode_role_key(role.id), serde_json::to_vec(&role)?)?;
        Ok(role)
    }

    fn check_role_transition(&self, role: &Role, to: RoleStatus) -> Result<()> {
        if !machine::role_transition_allowed(role.status, to) {
            return Err(StoreError::Validation(format!(
                "role {} cannot move {} -> {}",
                role.id, role.status, to
            )));
        }
        Ok(())
    }

    // ---- applications ------------------------------------------------------

    /// Create a fresh application, or hand back the active one for this
    /// (profile, role) pair
    pub fn create_or_reuse_application(
        &self,
        profile_id: u64,
        role_id: u64,
    ) -> Result<(Application, bool)> {
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| StoreError::Validation("create lock poisoned".to_string()))?;

        if let Some(value) = self.lookups.get(encode_active_idx(profile_id, role_id))? {
            if let Some(id) = decode_id_value(&value) {
                if let Some(app) = self.application(id)? {
                    if app.status.is_active() {
                        debug!(application_id = app.id, "Reusing active application");
                        return Ok((app, true));
                    }
                }
            }
            // Stale index entry for a terminal row; fall through and replace
            warn!(profile_id, role_id, "Dropping stale active-application index");
        }

        let now = Utc::now();
        let app = Application {
            id: self.alloc_id(&self.app_seq, META_APP_SEQ)?,
            profile_id,
            role_id,
            status: ApplicationStatus::Draft,
            attempts: 0,
            queue_task_id: None,
            resume_url: None,
            cover_letter_url: None,
            custom_answers: BTreeMap::new(),
            approval_context: None,
            screenshot_url: None,
            error_message: None,
            notes: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.applications,
            encode_app_key(app.id),
            serde_json::to_vec(&app)?,
        );
        batch.insert(
            &self.lookups,
            encode_active_idx(profile_id, role_id),
            encode_id_value(app.id),
        );
        batch.commit()?;

        debug!(application_id = app.id, profile_id, role_id, "Created application");
        Ok((app, false))
    }

    pub fn application(&self, id: u64) -> Result<Option<Application>> {
        match self.applications.get(encode_app_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Apply a state-machine event and its field effects atomically
    pub fn apply_event(&self, application_id: u64, event: &Event) -> Result<Application> {
        let mut app = self.application(application_id)?.ok_or(StoreError::NotFound {
            entity: "application",
            id: application_id,
        })?;

        let from = app.status;
        let to = machine::next(from, event)?;

        match event {
            Event::DocumentsReady {
                resume_url,
                cover_letter_url,
            } => {
                app.resume_url = Some(resume_url.clone());
                app.cover_letter_url = Some(cover_letter_url.clone());
                app.error_message = None;
            }
            Event::TaskPublished { task_id } => {
                app.queue_task_id = Some(task_id.clone());
                // Approval resumes continue the same attempt; everything else
                // consumes budget
                if from != ApplicationStatus::WaitingApproval {
                    app.attempts += 1;
                }
            }
            Event::WorkerApplied {
                submitted_at,
                notes,
                screenshot_url,
            } => {
                if app.resume_url.is_none() || app.cover_letter_url.is_none() {
                    return Err(StoreError::Invariant(format!(
                        "application {application_id} submitted without document URLs"
                    )));
                }
                app.submitted_at = Some(*submitted_at);
                app.queue_task_id = None;
                if notes.is_some() {
                    app.notes = notes.clone();
                }
                if screenshot_url.is_some() {
                    app.screenshot_url = screenshot_url.clone();
                }
            }
            Event::WorkerFailed { error } => {
                app.error_message = Some(error.clone());
                app.queue_task_id = None;
            }
            Event::WorkerNeedsApproval { context } => {
                // The paused conversation is tracked by the task id
                if app.queue_task_id.is_none() {
                    return Err(StoreError::Invariant(format!(
                        "application {application_id} paused without a task id"
                    )));
                }
                if let Some(context) = context {
                    app.approval_context = Some(context.clone());
                }
            }
            Event::WorkerNeedsUserInfo => {
                app.queue_task_id = None;
            }
            Event::WorkerLost => {
                app.error_message = Some("worker lost".to_string());
                app.queue_task_id = None;
            }
            Event::RetryRequested => {
                app.error_message = None;
            }
            Event::Advanced { .. } => {}
        }

        let was_active = from.is_active();
        app.status = to;
        app.updated_at = Utc::now();

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.applications,
            encode_app_key(app.id),
            serde_json::to_vec(&app)?,
        );
        let idx = encode_active_idx(app.profile_id, app.role_id);
        if was_active && !to.is_active() {
            batch.remove(&self.lookups, idx);
        } else if !was_active && to.is_active() {
            // A retry may only reactivate if no sibling claimed the pair
            if let Some(value) = self.lookups.get(&idx)? {
                if decode_id_value(&value) != Some(app.id) {
                    return Err(StoreError::Invariant(format!(
                        "another active application exists for profile {} role {}",
                        app.profile_id, app.role_id
                    )));
                }
            }
            batch.insert(&self.lookups, idx, encode_id_value(app.id));
        }
        batch.commit()?;

        debug!(
            application_id,
            from = %from,
            to = %app.status,
            event = event.name(),
            "Applied transition"
        );
        Ok(app)
    }

    /// Record the paused-page snapshot; legal while the conversation is held
    /// open (SUBMITTING or WAITING_APPROVAL, either arrival order)
    pub fn set_approval_context(
        &self,
        application_id: u64,
        context: ApprovalContext,
    ) -> Result<Application> {
        let mut app = self.application(application_id)?.ok_or(StoreError::NotFound {
            entity: "application",
            id: application_id,
        })?;
        if !matches!(
            app.status,
            ApplicationStatus::Submitting | ApplicationStatus::WaitingApproval
        ) {
            return Err(StoreError::Validation(format!(
                "application {application_id} is {} and cannot take approval context",
                app.status
            )));
        }
        app.approval_context = Some(context);
        app.updated_at = Utc::now();
        self.applications
            .insert(encode_app_key(app.id), serde_json::to_vec(&app)?)?;
        Ok(app)
    }

    pub fn merge_custom_answer(
        &self,
        application_id: u64,
        question: &str,
        answer: &str,
    ) -> Result<Application> {
        let mut app = self.application(application_id)?.ok_or(StoreError::NotFound {
            entity: "application",
            id: application_id,
        })?;
        app.custom_answers
            .insert(question.to_string(), answer.to_string());
        app.updated_at = Utc::now();
        self.applications
            .insert(encode_app_key(app.id), serde_json::to_vec(&app)?)?;
        Ok(app)
    }

    pub fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
        limit: usize,
    ) -> Result<Vec<Application>> {
        let mut out = Vec::new();
        for item in self.applications.iter() {
            let (_, value) = item?;
            let app: Application = serde_json::from_slice(&value)?;
            if status.is_none_or(|wanted| app.status == wanted) {
                out.push(app);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// The open approval that has waited longest for this profile
    pub fn oldest_waiting_approval(&self, profile_id: u64) -> Result<Option<Application>> {
        let mut oldest: Option<Application> = None;
        for item in self.applications.iter() {
            let (_, value) = item?;
            let app: Application = serde_json::from_slice(&value)?;
            if app.profile_id != profile_id || app.status != ApplicationStatus::WaitingApproval {
                continue;
            }
            let asked = waiting_since(&app);
            if oldest.as_ref().is_none_or(|cur| asked < waiting_since(cur)) {
                oldest = Some(app);
            }
        }
        Ok(oldest)
    }

    /// Applications stuck in SUBMITTING since before the cutoff
    pub fn stuck_submitting(&self, cutoff: DateTime<Utc>) -> Result<Vec<Application>> {
        let mut out = Vec::new();
        for item in self.applications.iter() {
            let (_, value) = item?;
            let app: Application = serde_json::from_slice(&value)?;
            if app.status == ApplicationStatus::Submitting && app.updated_at < cutoff {
                out.push(app);
            }
        }
        Ok(out)
    }

    pub fn count_by_status(&self) -> Result<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        for item in self.applications.iter() {
            let (_, value) = item?;
            let app: Application = serde_json::from_slice(&value)?;
            *out.entry(app.status.to_string()).or_insert(0) += 1;
        }
        Ok(out)
    }

    // ---- dead letters and inbound ------------------------------------------

    pub fn record_dead_letter(
        &self,
        source: &str,
        reason: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let seq = self.alloc_id(&self.dl_seq, META_DL_SEQ)?;
        let entry = DeadLetter {
            source: source.to_string(),
            reason: reason.to_string(),
            payload,
            recorded_at: Utc::now(),
        };
        self.dead_letter
            .insert(encode_dead_letter_key(seq), serde_json::to_vec(&entry)?)?;
        warn!(source, reason, "Recorded dead letter");
        Ok(())
    }

    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut out = Vec::new();
        for item in self.dead_letter.iter().take(limit) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn record_inbound(&self, from: &str, body: &str) -> Result<()> {
        let seq = self.alloc_id(&self.inbound_seq, META_INBOUND_SEQ)?;
        let entry = InboundMessage {
            from: from.to_string(),
            body: body.to_string(),
            recorded_at: Utc::now(),
        };
        self.inbound
            .insert(encode_inbound_key(seq), serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    // ---- pause switch ------------------------------------------------------

    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.metadata.insert(
            encode_meta_key(META_PAUSED),
            if paused { b"1".as_slice() } else { b"0".as_slice() },
        )?;
        Ok(())
    }

    pub fn is_paused(&self) -> Result<bool> {
        Ok(self
            .metadata
            .get(encode_meta_key(META_PAUSED))?
            .is_some_and(|value| value.as_ref() == b"1"))
    }

    // ---- maintenance -------------------------------------------------------

    /// Drop dead-letter and inbound records older than the policy allows
    pub fn prune_expired(&self, policy: &RetentionPolicy) -> Result<PruneStats> {
        let now = Utc::now();
        let mut stats = PruneStats::default();

        stats.dead_letters_pruned = prune_partition::<DeadLetter>(
            &self.dead_letter,
            now - policy.dead_letter_ttl,
            |entry| entry.recorded_at,
        )?;
        stats.inbound_pruned = prune_partition::<InboundMessage>(
            &self.inbound,
            now - policy.inbound_ttl,
            |entry| entry.recorded_at,
        )?;

        if stats.dead_letters_pruned + stats.inbound_pruned > 0 {
            info!(?stats, "Pruning complete");
        }
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is readable
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key(META_APP_SEQ))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |partition: &PartitionHandle| -> Result<usize> {
            let mut n = 0;
            for item in partition.iter() {
                item?;
                n += 1;
            }
            Ok(n)
        };
        Ok(StoreStats {
            profile_count: count(&self.profiles)?,
            role_count: count(&self.roles)?,
            application_count: count(&self.applications)?,
            dead_letter_count: count(&self.dead_letter)?,
        })
    }
}

fn waiting_since(app: &Application) -> DateTime<Utc> {
    app.approval_context
        .as_ref()
        .map(|context| context.asked_at)
        .unwrap_or(app.updated_at)
}

fn prune_partition<T: serde::de::DeserializeOwned>(
    partition: &PartitionHandle,
    cutoff: DateTime<Utc>,
    recorded_at: impl Fn(&T) -> DateTime<Utc>,
) -> Result<usize> {
    let mut doomed = Vec::new();
    for item in partition.iter() {
        let (key, value) = item?;
        let entry: T = serde_json::from_slice(&value)?;
        if recorded_at(&entry) < cutoff {
            doomed.push(key);
        }
    }
    let pruned = doomed.len();
    for key in doomed {
        partition.remove(key)?;
    }
    Ok(pruned)
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub dead_letter_ttl: chrono::Duration,
    pub inbound_ttl: chrono::Duration,
}

#[derive(Debug, Default)]
pub struct PruneStats {
    pub dead_letters_pruned: usize,
    pub inbound_pruned: usize,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub profile_count: usize,
    pub role_count: usize,
    pub application_count: usize,
    pub dead_letter_count: usize,
}
