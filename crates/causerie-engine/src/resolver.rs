//! Permission resolver.
//!
//! Pure function of the committed conversation state: callers pass the
//! conversation and the actor's overrides as read under the conversation
//! lock, so the result can never reflect a revoked capability once the
//! revocation has committed.

use causerie_shared::permissions::{
    Capabilities, PermissionOverrides, PermissionPolicy, Reach,
};
use causerie_shared::{Conversation, ConversationKind, EngineError, EngineResult, Role, UserId};

/// Both participants of a direct conversation get the same set.
const DIRECT: Capabilities = Capabilities {
    role: Role::Member,
    post: true,
    mention: true,
    edit: Reach::Own,
    delete: Reach::Own,
    invite: false,
    change_settings: false,
    download_video: true,
    download_audio: true,
};

pub fn resolve(
    policy: &PermissionPolicy,
    conversation: &Conversation,
    overrides: Option<&PermissionOverrides>,
    actor: UserId,
) -> EngineResult<Capabilities> {
    let member = conversation.member(actor).ok_or(EngineError::NotAMember)?;

    if conversation.kind == ConversationKind::Direct {
        return Ok(DIRECT);
    }

    let role = member.role;
    let mut flags = policy.defaults_for(conversation.kind, role);
    if let Some(overrides) = overrides {
        flags = flags.with_overrides(overrides);
    }

    // Channels are broadcast-only whatever the overrides say.
    let post = flags.can_post
        && (conversation.kind != ConversationKind::Channel || role.is_admin());

    let reach = |granted: bool| match (granted, role.is_admin()) {
        (false, _) => Reach::None,
        (true, false) => Reach::Own,
        (true, true) => Reach::Any,
    };

    Ok(Capabilities {
        role,
        post,
        mention: post,
        edit: reach(flags.can_edit),
        delete: reach(flags.can_delete),
        invite: flags.can_invite,
        change_settings: role.is_admin(),
        download_video: flags.can_download_video,
        download_audio: flags.can_download_audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::{ConversationId, ConversationSettings, Member};
    use chrono::Utc;

    fn conversation(kind: ConversationKind, members: &[(UserId, Role)]) -> Conversation {
        Conversation {
            id: ConversationId::new(),
            kind,
            name: None,
            members: members
                .iter()
                .map(|(user_id, role)| Member {
                    user_id: *user_id,
                    role: *role,
                    joined_at: Utc::now(),
                })
                .collect(),
            settings: ConversationSettings::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn non_member_is_rejected() {
        let conv = conversation(ConversationKind::Group, &[(UserId::new(), Role::Owner)]);
        let err = resolve(&PermissionPolicy::default(), &conv, None, UserId::new()).unwrap_err();
        assert_eq!(err, EngineError::NotAMember);
    }

    #[test]
    fn direct_members_get_own_content_rights() {
        let (a, b) = (UserId::new(), UserId::new());
        let conv = conversation(ConversationKind::Direct, &[(a, Role::Member), (b, Role::Member)]);
        let caps = resolve(&PermissionPolicy::default(), &conv, None, b).unwrap();
        assert!(caps.post);
        assert_eq!(caps.edit, Reach::Own);
        assert_eq!(caps.delete, Reach::Own);
        assert!(!caps.change_settings);
        assert!(!caps.invite);
    }

    #[test]
    fn group_member_defaults_and_overrides() {
        let (owner, member) = (UserId::new(), UserId::new());
        let conv = conversation(
            ConversationKind::Group,
            &[(owner, Role::Owner), (member, Role::Member)],
        );
        let policy = PermissionPolicy::default();

        let caps = resolve(&policy, &conv, None, member).unwrap();
        assert!(caps.post);
        assert_eq!(caps.edit, Reach::Own);
        assert!(!caps.invite);

        let overrides = PermissionOverrides {
            can_post: Some(false),
            can_delete: Some(false),
            can_download_video: Some(false),
            ..Default::default()
        };
        let caps = resolve(&policy, &conv, Some(&overrides), member).unwrap();
        assert!(!caps.post);
        assert!(!caps.mention);
        assert_eq!(caps.delete, Reach::None);
        assert!(!caps.download_video);
        assert!(caps.download_audio);
    }

    #[test]
    fn admins_moderate_any_message() {
        let admin = UserId::new();
        let conv = conversation(ConversationKind::Group, &[(admin, Role::Admin)]);
        let caps = resolve(&PermissionPolicy::default(), &conv, None, admin).unwrap();
        assert_eq!(caps.edit, Reach::Any);
        assert_eq!(caps.delete, Reach::Any);
        assert!(caps.change_settings);
    }

    #[test]
    fn channel_members_never_post() {
        let (owner, member) = (UserId::new(), UserId::new());
        let conv = conversation(
            ConversationKind::Channel,
            &[(owner, Role::Owner), (member, Role::Member)],
        );
        let overrides = PermissionOverrides {
            can_post: Some(true),
            ..Default::default()
        };
        let caps =
            resolve(&PermissionPolicy::default(), &conv, Some(&overrides), member).unwrap();
        assert!(!caps.post);

        let caps = resolve(&PermissionPolicy::default(), &conv, None, owner).unwrap();
        assert!(caps.post);
    }
}
