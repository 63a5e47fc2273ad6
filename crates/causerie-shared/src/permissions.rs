//! Permission model: role default tables, sparse per-member overrides and the
//! resolved capability set.
//!
//! Resolution is a two-layer lookup. The role default comes from
//! [`PermissionPolicy`], then any flag present in the member's
//! [`PermissionOverrides`] replaces it. Conversation-kind restrictions (a
//! channel is broadcast-only) are applied by the resolver afterwards.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationKind, Role};

/// Concrete per-member permission flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionFlags {
    pub can_post: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_invite: bool,
    pub can_download_video: bool,
    pub can_download_audio: bool,
}

impl PermissionFlags {
    pub const ALL: Self = Self {
        can_post: true,
        can_edit: true,
        can_delete: true,
        can_invite: true,
        can_download_video: true,
        can_download_audio: true,
    };

    pub fn with_overrides(mut self, overrides: &PermissionOverrides) -> Self {
        if let Some(v) = overrides.can_post {
            self.can_post = v;
        }
        if let Some(v) = overrides.can_edit {
            self.can_edit = v;
        }
        if let Some(v) = overrides.can_delete {
            self.can_delete = v;
        }
        if let Some(v) = overrides.can_invite {
            self.can_invite = v;
        }
        if let Some(v) = overrides.can_download_video {
            self.can_download_video = v;
        }
        if let Some(v) = overrides.can_download_audio {
            self.can_download_audio = v;
        }
        self
    }
}

/// Sparse override of [`PermissionFlags`]. `None` keeps the role default.
///
/// The same shape doubles as the patch accepted by `set_permission`: a patch
/// is merged field by field into the stored overrides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_post: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_edit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_invite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_download_video: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_download_audio: Option<bool>,
}

impl PermissionOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, patch: &PermissionOverrides) {
        self.can_post = patch.can_post.or(self.can_post);
        self.can_edit = patch.can_edit.or(self.can_edit);
        self.can_delete = patch.can_delete.or(self.can_delete);
        self.can_invite = patch.can_invite.or(self.can_invite);
        self.can_download_video = patch.can_download_video.or(self.can_download_video);
        self.can_download_audio = patch.can_download_audio.or(self.can_download_audio);
    }
}

/// Role default table for plain members. Owners and admins always default
/// to [`PermissionFlags::ALL`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub group_member: PermissionFlags,
    pub channel_member: PermissionFlags,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            group_member: PermissionFlags {
                can_post: true,
                can_edit: true,
                can_delete: true,
                can_invite: false,
                can_download_video: true,
                can_download_audio: true,
            },
            channel_member: PermissionFlags {
                can_post: false,
                can_edit: false,
                can_delete: false,
                can_invite: false,
                can_download_video: true,
                can_download_audio: true,
            },
        }
    }
}

impl PermissionPolicy {
    pub fn defaults_for(&self, kind: ConversationKind, role: Role) -> PermissionFlags {
        if role.is_admin() {
            return PermissionFlags::ALL;
        }
        match kind {
            ConversationKind::Channel => self.channel_member,
            ConversationKind::Group | ConversationKind::Direct => self.group_member,
        }
    }
}

/// How far an edit or delete capability extends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Reach {
    None,
    /// Only the actor's own messages.
    Own,
    /// Any member's messages (moderation).
    Any,
}

impl Reach {
    pub fn permits(&self, actor_is_author: bool) -> bool {
        match self {
            Reach::None => false,
            Reach::Own => actor_is_author,
            Reach::Any => true,
        }
    }
}

/// The resolved capability set of one actor in one conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub role: Role,
    pub post: bool,
    pub mention: bool,
    pub edit: Reach,
    pub delete: Reach,
    pub invite: bool,
    pub change_settings: bool,
    pub download_video: bool,
    pub download_audio: bool,
}
