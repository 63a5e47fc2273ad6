//! Conversation store: the single source of truth for membership, roles,
//! per-member permission overrides and conversation settings.
//!
//! Each conversation sits behind its own `RwLock`. Mutations hold the write
//! half while checking the actor's capabilities and applying the change, and
//! readers get a [`ConversationView`] over the read half, so a permission
//! change is visible to every resolution that starts after it commits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

use causerie_shared::permissions::{Capabilities, PermissionOverrides, PermissionPolicy};
use causerie_shared::protocol::JournalRecord;
use causerie_shared::{
    Conversation, ConversationId, ConversationKind, ConversationSettings, EngineError,
    EngineResult, Member, MemberPermission, MutePolicy, Privacy, Role, UserId, UserPair,
};

use crate::journal::Journal;
use crate::locks::KeyedLocks;
use crate::resolver;

/// Longest accepted conversation name, in characters.
const MAX_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

struct Entry {
    conversation: Conversation,
    overrides: HashMap<UserId, PermissionOverrides>,
    /// Set when the conversation is deleted while other tasks still hold a
    /// handle to the entry.
    deleted: bool,
}

impl Entry {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            overrides: HashMap::new(),
            deleted: false,
        }
    }

    fn capabilities(&self, policy: &PermissionPolicy, actor: UserId) -> EngineResult<Capabilities> {
        resolver::resolve(
            policy,
            &self.conversation,
            self.overrides.get(&actor),
            actor,
        )
    }

    fn permissions(&self) -> Vec<MemberPermission> {
        self.overrides
            .iter()
            .map(|(user_id, overrides)| MemberPermission {
                conversation_id: self.conversation.id,
                user_id: *user_id,
                overrides: *overrides,
            })
            .collect()
    }

    fn journal_record(&self) -> JournalRecord {
        JournalRecord::Conversation {
            conversation: self.conversation.clone(),
            permissions: self.permissions(),
        }
    }

    fn member_mut(&mut self, user: UserId) -> EngineResult<&mut Member> {
        self.conversation
            .members
            .iter_mut()
            .find(|m| m.user_id == user)
            .ok_or_else(|| EngineError::not_found("member"))
    }

    /// Keep at least one admin in a non-empty group or channel by promoting
    /// the earliest-joined member. `exclude` is skipped when another
    /// candidate exists.
    fn ensure_admin(&mut self, exclude: Option<UserId>) -> Option<UserId> {
        let conv = &mut self.conversation;
        if conv.kind == ConversationKind::Direct || conv.members.is_empty() {
            return None;
        }
        if conv.admin_count() > 0 {
            return None;
        }

        let idx = conv
            .members
            .iter()
            .position(|m| Some(m.user_id) != exclude)
            .unwrap_or(0);
        conv.members[idx].role = Role::Admin;
        let promoted = conv.members[idx].user_id;

        info!(
            conversation = %conv.id,
            user = %promoted,
            "Promoted earliest member to admin"
        );
        Some(promoted)
    }
}

// ---------------------------------------------------------------------------
// Read view
// ---------------------------------------------------------------------------

/// Consistent read-only view of one conversation.
///
/// Membership and permissions cannot change while the view is alive, which
/// is what lets the ledger check capabilities and compute the recipient set
/// of an append against the same committed state.
pub struct ConversationView {
    entry: OwnedRwLockReadGuard<Entry>,
    policy: PermissionPolicy,
}

impl ConversationView {
    pub fn conversation(&self) -> &Conversation {
        &self.entry.conversation
    }

    pub fn id(&self) -> ConversationId {
        self.entry.conversation.id
    }

    pub fn is_member(&self, user: UserId) -> bool {
        self.entry.conversation.is_member(user)
    }

    pub fn capabilities(&self, actor: UserId) -> EngineResult<Capabilities> {
        self.entry.capabilities(&self.policy, actor)
    }

    pub fn overrides(&self, user: UserId) -> Option<PermissionOverrides> {
        self.entry.overrides.get(&user).copied()
    }
}

/// Partial update of [`ConversationSettings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsPatch {
    pub privacy: Option<Privacy>,
    pub comments_enabled: Option<bool>,
    pub default_mute: Option<MutePolicy>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ConversationStore {
    policy: PermissionPolicy,
    entries: RwLock<HashMap<ConversationId, Arc<RwLock<Entry>>>>,
    directs: RwLock<HashMap<UserPair, ConversationId>>,
    direct_locks: KeyedLocks<UserPair>,
    journal: Journal,
}

impl ConversationStore {
    pub fn new(policy: PermissionPolicy, lock_shards: usize, journal: Journal) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
            directs: RwLock::new(HashMap::new()),
            direct_locks: KeyedLocks::new(lock_shards),
            journal,
        }
    }

    /// Rebuild the store from persisted records.
    pub fn restored(
        policy: PermissionPolicy,
        lock_shards: usize,
        journal: Journal,
        conversations: Vec<Conversation>,
        permissions: Vec<MemberPermission>,
    ) -> Self {
        let mut entries: HashMap<ConversationId, Entry> = HashMap::new();
        let mut directs = HashMap::new();

        for conversation in conversations {
            if conversation.kind == ConversationKind::Direct && conversation.members.len() == 2 {
                let pair = UserPair::new(
                    conversation.members[0].user_id,
                    conversation.members[1].user_id,
                );
                directs.insert(pair, conversation.id);
            }
            entries.insert(conversation.id, Entry::new(conversation));
        }

        for permission in permissions {
            if let Some(entry) = entries.get_mut(&permission.conversation_id) {
                entry
                    .overrides
                    .insert(permission.user_id, permission.overrides);
            }
        }

        info!(
            conversations = entries.len(),
            directs = directs.len(),
            "Restored conversation store"
        );

        Self {
            policy,
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(id, entry)| (id, Arc::new(RwLock::new(entry))))
                    .collect(),
            ),
            directs: RwLock::new(directs),
            direct_locks: KeyedLocks::new(lock_shards),
            journal,
        }
    }

    async fn entry(&self, id: ConversationId) -> EngineResult<Arc<RwLock<Entry>>> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("conversation"))
    }

    async fn write_entry(&self, id: ConversationId) -> EngineResult<OwnedRwLockWriteGuard<Entry>> {
        let guard = self.entry(id).await?.write_owned().await;
        if guard.deleted {
            return Err(EngineError::not_found("conversation"));
        }
        Ok(guard)
    }

    async fn insert(&self, entry: Entry) -> Conversation {
        let conversation = entry.conversation.clone();
        self.journal.record(entry.journal_record());
        self.entries
            .write()
            .await
            .insert(conversation.id, Arc::new(RwLock::new(entry)));
        conversation
    }

    /// Open a consistent read view of a conversation.
    pub async fn view(&self, id: ConversationId) -> EngineResult<ConversationView> {
        let entry = self.entry(id).await?.read_owned().await;
        if entry.deleted {
            return Err(EngineError::not_found("conversation"));
        }
        Ok(ConversationView {
            entry,
            policy: self.policy,
        })
    }

    /// Capability set of `actor` in `id`, from the latest committed state.
    pub async fn resolve(&self, id: ConversationId, actor: UserId) -> EngineResult<Capabilities> {
        self.view(id).await?.capabilities(actor)
    }

    /// Every live conversation `user` belongs to.
    pub async fn conversations_for(&self, user: UserId) -> Vec<Conversation> {
        let handles: Vec<_> = self.entries.read().await.values().cloned().collect();

        let mut found = Vec::new();
        for handle in handles {
            let entry = handle.read().await;
            if !entry.deleted && entry.conversation.is_member(user) {
                found.push(entry.conversation.clone());
            }
        }
        found.sort_by_key(|c| c.created_at);
        found
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the direct conversation of `a` and `b`, creating it on first
    /// contact. The flag is `true` when this call created it.
    pub async fn get_or_create_direct(
        &self,
        a: UserId,
        b: UserId,
    ) -> EngineResult<(Conversation, bool)> {
        if a == b {
            return Err(EngineError::invalid(
                "a direct conversation needs two distinct users",
            ));
        }
        let pair = UserPair::new(a, b);

        if let Some(existing) = self.existing_direct(pair).await {
            return Ok((existing, false));
        }

        let _guard = self.direct_locks.lock(pair).await;

        // Another caller may have won the race while we waited.
        if let Some(existing) = self.existing_direct(pair).await {
            debug!(a = %a, b = %b, "Direct conversation created concurrently, reusing");
            return Ok((existing, false));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Direct,
            name: None,
            members: [a, b]
                .into_iter()
                .map(|user_id| Member {
                    user_id,
                    role: Role::Member,
                    joined_at: now,
                })
                .collect(),
            settings: ConversationSettings::default(),
            created_at: now,
        };

        let conversation = self.insert(Entry::new(conversation)).await;
        self.directs.write().await.insert(pair, conversation.id);

        info!(conversation = %conversation.id, a = %a, b = %b, "Created direct conversation");
        Ok((conversation, true))
    }

    async fn existing_direct(&self, pair: UserPair) -> Option<Conversation> {
        let id = *self.directs.read().await.get(&pair)?;
        let view = self.view(id).await.ok()?;
        Some(view.conversation().clone())
    }

    /// Create a group or channel owned by `creator`. Other members join in
    /// the given order as plain members; duplicates are ignored.
    pub async fn create_group(
        &self,
        creator: UserId,
        kind: ConversationKind,
        name: Option<String>,
        members: &[UserId],
        settings: ConversationSettings,
    ) -> EngineResult<Conversation> {
        if kind == ConversationKind::Direct {
            return Err(EngineError::invalid(
                "direct conversations are created per user pair",
            ));
        }
        let name = validate_name(name)?;

        let now = Utc::now();
        let mut roster = vec![Member {
            user_id: creator,
            role: Role::Owner,
            joined_at: now,
        }];
        for user in members {
            if !roster.iter().any(|m| m.user_id == *user) {
                roster.push(Member {
                    user_id: *user,
                    role: Role::Member,
                    joined_at: now,
                });
            }
        }

        let conversation = Conversation {
            id: ConversationId::new(),
            kind,
            name,
            members: roster,
            settings,
            created_at: now,
        };

        let conversation = self.insert(Entry::new(conversation)).await;
        info!(
            conversation = %conversation.id,
            kind = conversation.kind.as_str(),
            members = conversation.members.len(),
            "Created conversation"
        );
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add `user` as a plain member. Adding an existing member is a no-op;
    /// the flag is `true` when the user actually joined.
    pub async fn add_member(
        &self,
        actor: UserId,
        id: ConversationId,
        user: UserId,
    ) -> EngineResult<(Conversation, bool)> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "members of a direct conversation are fixed")?;

        let caps = entry.capabilities(&self.policy, actor)?;
        if !caps.invite {
            return Err(EngineError::forbidden("inviting members is not allowed"));
        }

        if entry.conversation.is_member(user) {
            return Ok((entry.conversation.clone(), false));
        }

        entry.conversation.members.push(Member {
            user_id: user,
            role: Role::Member,
            joined_at: Utc::now(),
        });
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, user = %user, by = %actor, "Member added");
        Ok((entry.conversation.clone(), true))
    }

    /// Self-join of a public group or channel.
    pub async fn join_public(
        &self,
        user: UserId,
        id: ConversationId,
    ) -> EngineResult<(Conversation, bool)> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "members of a direct conversation are fixed")?;

        if entry.conversation.is_member(user) {
            return Ok((entry.conversation.clone(), false));
        }
        if entry.conversation.settings.privacy != Privacy::Public {
            return Err(EngineError::forbidden("conversation is private"));
        }

        entry.conversation.members.push(Member {
            user_id: user,
            role: Role::Member,
            joined_at: Utc::now(),
        });
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, user = %user, "Joined public conversation");
        Ok((entry.conversation.clone(), true))
    }

    /// Remove `target`. Members may always leave; removing someone else
    /// needs `change_settings` and at least the target's role.
    pub async fn remove_member(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
    ) -> EngineResult<Conversation> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "members of a direct conversation are fixed")?;

        let caps = entry.capabilities(&self.policy, actor)?;
        let target_role = entry
            .conversation
            .member(target)
            .map(|m| m.role)
            .ok_or_else(|| EngineError::not_found("member"))?;

        if actor != target && !(caps.change_settings && caps.role >= target_role) {
            return Err(EngineError::forbidden("cannot remove this member"));
        }

        entry.conversation.members.retain(|m| m.user_id != target);
        entry.overrides.remove(&target);
        entry.ensure_admin(None);
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, user = %target, by = %actor, "Member removed");
        Ok(entry.conversation.clone())
    }

    pub async fn set_role(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
        role: Role,
    ) -> EngineResult<Conversation> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "direct conversations have no roles")?;

        let caps = entry.capabilities(&self.policy, actor)?;
        let current = entry
            .conversation
            .member(target)
            .map(|m| m.role)
            .ok_or_else(|| EngineError::not_found("member"))?;

        if !caps.change_settings || caps.role < current || caps.role < role {
            return Err(EngineError::forbidden("cannot change this member's role"));
        }
        if current.is_admin()
            && !role.is_admin()
            && entry.conversation.admin_count() == 1
            && entry.conversation.members.len() == 1
        {
            return Err(EngineError::Conflict(
                "the only member must remain an admin".into(),
            ));
        }

        entry.member_mut(target)?.role = role;
        entry.ensure_admin(Some(target));
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, user = %target, role = role.as_str(), by = %actor, "Role changed");
        Ok(entry.conversation.clone())
    }

    /// Merge `patch` into the target's overrides. Absent flags keep their
    /// current override; an override is never reset to the role default.
    pub async fn set_permission(
        &self,
        actor: UserId,
        id: ConversationId,
        target: UserId,
        patch: PermissionOverrides,
    ) -> EngineResult<MemberPermission> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "direct conversations have no member permissions")?;

        let caps = entry.capabilities(&self.policy, actor)?;
        let target_role = entry
            .conversation
            .member(target)
            .map(|m| m.role)
            .ok_or_else(|| EngineError::not_found("member"))?;

        if !caps.change_settings || caps.role < target_role {
            return Err(EngineError::forbidden(
                "cannot change this member's permissions",
            ));
        }

        let mut overrides = entry.overrides.get(&target).copied().unwrap_or_default();
        overrides.merge(&patch);
        if overrides.is_empty() {
            entry.overrides.remove(&target);
        } else {
            entry.overrides.insert(target, overrides);
        }
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, user = %target, by = %actor, "Member permissions changed");
        Ok(MemberPermission {
            conversation_id: id,
            user_id: target,
            overrides,
        })
    }

    pub async fn update_settings(
        &self,
        actor: UserId,
        id: ConversationId,
        patch: SettingsPatch,
    ) -> EngineResult<Conversation> {
        let mut entry = self.write_entry(id).await?;
        reject_direct(&entry.conversation, "direct conversations have no settings")?;

        let caps = entry.capabilities(&self.policy, actor)?;
        if !caps.change_settings {
            return Err(EngineError::forbidden("only admins may change settings"));
        }

        let settings = &mut entry.conversation.settings;
        if let Some(privacy) = patch.privacy {
            settings.privacy = privacy;
        }
        if let Some(enabled) = patch.comments_enabled {
            settings.comments_enabled = enabled;
        }
        if let Some(policy) = patch.default_mute {
            settings.default_mute = policy;
        }
        self.journal.record(entry.journal_record());

        debug!(conversation = %id, by = %actor, "Settings updated");
        Ok(entry.conversation.clone())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete the conversation. Owners only; either participant for a
    /// direct conversation. Once the owner has left, any admin may delete.
    /// Returns the last state before deletion.
    pub async fn delete(&self, actor: UserId, id: ConversationId) -> EngineResult<Conversation> {
        let mut entry = self.write_entry(id).await?;
        let caps = entry.capabilities(&self.policy, actor)?;
        let ownerless = !entry
            .conversation
            .members
            .iter()
            .any(|m| m.role == Role::Owner);
        let allowed = match entry.conversation.kind {
            ConversationKind::Direct => true,
            _ => caps.role == Role::Owner || (ownerless && caps.role.is_admin()),
        };
        if !allowed {
            return Err(EngineError::forbidden("only the owner may delete"));
        }

        entry.deleted = true;
        self.entries.write().await.remove(&id);
        if entry.conversation.kind == ConversationKind::Direct {
            self.directs.write().await.retain(|_, conv| *conv != id);
        }
        self.journal.record(JournalRecord::ConversationDeleted(id));

        info!(conversation = %id, by = %actor, "Deleted conversation");
        Ok(entry.conversation.clone())
    }

    pub fn purge_idle_locks(&self) -> usize {
        self.direct_locks.purge_idle()
    }
}

fn reject_direct(conversation: &Conversation, reason: &str) -> EngineResult<()> {
    if conversation.kind == ConversationKind::Direct {
        return Err(EngineError::forbidden(reason));
    }
    Ok(())
}

fn validate_name(name: Option<String>) -> EngineResult<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::invalid(format!(
            "name longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(PermissionPolicy::default(), 4, Journal::disabled())
    }

    async fn group(store: &ConversationStore, owner: UserId, members: &[UserId]) -> Conversation {
        store
            .create_group(
                owner,
                ConversationKind::Group,
                Some("team".into()),
                members,
                ConversationSettings::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn direct_conversation_is_idempotent() {
        let store = store();
        let (a, b) = (UserId::new(), UserId::new());

        let (first, created) = store.get_or_create_direct(a, b).await.unwrap();
        assert!(created);
        let (second, created) = store.get_or_create_direct(b, a).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(first.members.len(), 2);
    }

    #[tokio::test]
    async fn direct_with_self_is_rejected() {
        let store = store();
        let a = UserId::new();
        assert!(matches!(
            store.get_or_create_direct(a, a).await,
            Err(EngineError::Invalid(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_direct_creation_yields_one_conversation() {
        let store = Arc::new(store());
        let (a, b) = (UserId::new(), UserId::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
                store.get_or_create_direct(x, y).await.unwrap().0.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.conversations_for(a).await.len(), 1);
    }

    #[tokio::test]
    async fn group_creation_dedupes_members() {
        let store = store();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m, m, owner]).await;
        assert_eq!(conv.members.len(), 2);
        assert_eq!(conv.members[0].role, Role::Owner);
        assert_eq!(conv.members[1].role, Role::Member);
    }

    #[tokio::test]
    async fn members_cannot_invite_by_default() {
        let store = store();
        let (owner, m, newcomer) = (UserId::new(), UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m]).await;

        assert!(matches!(
            store.add_member(m, conv.id, newcomer).await,
            Err(EngineError::Forbidden(_))
        ));

        let (updated, joined) = store.add_member(owner, conv.id, newcomer).await.unwrap();
        assert!(joined);
        assert!(updated.is_member(newcomer));

        let (_, joined) = store.add_member(owner, conv.id, newcomer).await.unwrap();
        assert!(!joined);
    }

    #[tokio::test]
    async fn removing_sole_admin_promotes_earliest_member() {
        let store = store();
        let (owner, m2, m3) = (UserId::new(), UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m2, m3]).await;

        let after = store.remove_member(owner, conv.id, owner).await.unwrap();
        assert_eq!(after.members.len(), 2);
        assert_eq!(after.member(m2).unwrap().role, Role::Admin);
        assert_eq!(after.member(m3).unwrap().role, Role::Member);
        assert_eq!(after.admin_count(), 1);
    }

    #[tokio::test]
    async fn admin_may_delete_once_owner_left() {
        let store = store();
        let (owner, admin, m3) = (UserId::new(), UserId::new(), UserId::new());
        let conv = group(&store, owner, &[admin, m3]).await;
        store.set_role(owner, conv.id, admin, Role::Admin).await.unwrap();

        assert!(matches!(
            store.delete(admin, conv.id).await,
            Err(EngineError::Forbidden(_))
        ));

        store.remove_member(owner, conv.id, owner).await.unwrap();
        assert!(matches!(
            store.delete(m3, conv.id).await,
            Err(EngineError::Forbidden(_))
        ));
        store.delete(admin, conv.id).await.unwrap();
        assert!(matches!(
            store.resolve(conv.id, admin).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn promoted_member_may_delete_ownerless_group() {
        let store = store();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m2]).await;

        store.remove_member(owner, conv.id, owner).await.unwrap();
        store.delete(m2, conv.id).await.unwrap();
    }

    #[tokio::test]
    async fn members_cannot_remove_others_but_can_leave() {
        let store = store();
        let (owner, m2, m3) = (UserId::new(), UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m2, m3]).await;

        assert!(matches!(
            store.remove_member(m2, conv.id, m3).await,
            Err(EngineError::Forbidden(_))
        ));
        let after = store.remove_member(m2, conv.id, m2).await.unwrap();
        assert!(!after.is_member(m2));
    }

    #[tokio::test]
    async fn admin_cannot_remove_owner() {
        let store = store();
        let (owner, admin) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[admin]).await;
        store.set_role(owner, conv.id, admin, Role::Admin).await.unwrap();

        assert!(matches!(
            store.remove_member(admin, conv.id, owner).await,
            Err(EngineError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn demoting_last_admin_promotes_someone_else() {
        let store = store();
        let (owner, m2) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m2]).await;

        let after = store.set_role(owner, conv.id, owner, Role::Member).await.unwrap();
        assert_eq!(after.member(owner).unwrap().role, Role::Member);
        assert_eq!(after.member(m2).unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn lone_admin_cannot_demote_self() {
        let store = store();
        let owner = UserId::new();
        let conv = group(&store, owner, &[]).await;
        assert!(matches!(
            store.set_role(owner, conv.id, owner, Role::Member).await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn admin_cannot_grant_owner() {
        let store = store();
        let (owner, admin, m) = (UserId::new(), UserId::new(), UserId::new());
        let conv = group(&store, owner, &[admin, m]).await;
        store.set_role(owner, conv.id, admin, Role::Admin).await.unwrap();

        assert!(matches!(
            store.set_role(admin, conv.id, m, Role::Owner).await,
            Err(EngineError::Forbidden(_))
        ));
        store.set_role(admin, conv.id, m, Role::Admin).await.unwrap();
    }

    #[tokio::test]
    async fn permission_changes_are_visible_immediately() {
        let store = store();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m]).await;
        assert!(store.resolve(conv.id, m).await.unwrap().post);

        let patch = PermissionOverrides {
            can_post: Some(false),
            ..Default::default()
        };
        let stored = store.set_permission(owner, conv.id, m, patch).await.unwrap();
        assert_eq!(stored.overrides.can_post, Some(false));
        assert!(!store.resolve(conv.id, m).await.unwrap().post);

        assert!(matches!(
            store.set_permission(m, conv.id, owner, patch).await,
            Err(EngineError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn absent_flags_keep_their_override() {
        let store = store();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m]).await;

        let deny_post = PermissionOverrides {
            can_post: Some(false),
            ..Default::default()
        };
        store.set_permission(owner, conv.id, m, deny_post).await.unwrap();

        let grant_invite = PermissionOverrides {
            can_invite: Some(true),
            ..Default::default()
        };
        let stored = store
            .set_permission(owner, conv.id, m, grant_invite)
            .await
            .unwrap();
        assert_eq!(stored.overrides.can_post, Some(false));
        assert_eq!(stored.overrides.can_invite, Some(true));

        let caps = store.resolve(conv.id, m).await.unwrap();
        assert!(!caps.post);
        assert!(caps.invite);
    }

    #[tokio::test]
    async fn settings_are_admin_only() {
        let store = store();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m]).await;
        let patch = SettingsPatch {
            privacy: Some(Privacy::Public),
            comments_enabled: Some(false),
            default_mute: None,
        };

        assert!(matches!(
            store.update_settings(m, conv.id, patch).await,
            Err(EngineError::Forbidden(_))
        ));
        let after = store.update_settings(owner, conv.id, patch).await.unwrap();
        assert_eq!(after.settings.privacy, Privacy::Public);
        assert!(!after.settings.comments_enabled);
    }

    #[tokio::test]
    async fn only_public_conversations_accept_self_join() {
        let store = store();
        let (owner, stranger) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[]).await;

        assert!(matches!(
            store.join_public(stranger, conv.id).await,
            Err(EngineError::Forbidden(_))
        ));

        let patch = SettingsPatch {
            privacy: Some(Privacy::Public),
            ..Default::default()
        };
        store.update_settings(owner, conv.id, patch).await.unwrap();

        let (after, joined) = store.join_public(stranger, conv.id).await.unwrap();
        assert!(joined);
        assert_eq!(after.member(stranger).map(|m| m.role), Some(Role::Member));
        assert!(!store.join_public(stranger, conv.id).await.unwrap().1);
    }

    #[tokio::test]
    async fn direct_membership_is_fixed() {
        let store = store();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let (conv, _) = store.get_or_create_direct(a, b).await.unwrap();

        assert!(matches!(
            store.add_member(a, conv.id, c).await,
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            store.remove_member(a, conv.id, b).await,
            Err(EngineError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn delete_requires_owner_and_frees_direct_pair() {
        let store = store();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&store, owner, &[m]).await;

        assert!(matches!(
            store.delete(m, conv.id).await,
            Err(EngineError::Forbidden(_))
        ));
        store.delete(owner, conv.id).await.unwrap();
        assert!(matches!(
            store.view(conv.id).await,
            Err(EngineError::NotFound(_))
        ));

        let (a, b) = (UserId::new(), UserId::new());
        let (direct, _) = store.get_or_create_direct(a, b).await.unwrap();
        store.delete(b, direct.id).await.unwrap();
        let (fresh, created) = store.get_or_create_direct(a, b).await.unwrap();
        assert!(created);
        assert_ne!(fresh.id, direct.id);
    }

    #[tokio::test]
    async fn restore_rebuilds_directs_and_overrides() {
        let source = store();
        let (a, b) = (UserId::new(), UserId::new());
        let (direct, _) = source.get_or_create_direct(a, b).await.unwrap();
        let (owner, m) = (UserId::new(), UserId::new());
        let conv = group(&source, owner, &[m]).await;
        let permission = source
            .set_permission(
                owner,
                conv.id,
                m,
                PermissionOverrides {
                    can_post: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let restored = ConversationStore::restored(
            PermissionPolicy::default(),
            4,
            Journal::disabled(),
            vec![direct.clone(), conv.clone()],
            vec![permission],
        );

        let (again, created) = restored.get_or_create_direct(b, a).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, direct.id);
        assert!(!restored.resolve(conv.id, m).await.unwrap().post);
    }
}
