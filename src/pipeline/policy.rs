// Declared per-action permission policy
//
// Every supported action is an enum variant and its policy is one arm of an
// exhaustive match, so adding an action without declaring its policy does not
// compile.

use serde::Serialize;

use super::resource::ResourceKind;

/// Backend service family addressed by one `<domain>_ops` endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Domain {
    User,
    Campaign,
    Content,
    Messaging,
    Waitlist,
    Search,
    Moderation,
    Referral,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::User,
        Domain::Campaign,
        Domain::Content,
        Domain::Messaging,
        Domain::Waitlist,
        Domain::Search,
        Domain::Moderation,
        Domain::Referral,
    ];

    /// Name used as resource kind and as the `service_specific` section key
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::User => "user",
            Domain::Campaign => "campaign",
            Domain::Content => "content",
            Domain::Messaging => "messaging",
            Domain::Waitlist => "waitlist",
            Domain::Search => "search",
            Domain::Moderation => "contentmoderation",
            Domain::Referral => "referral",
        }
    }

    /// Resolve `campaign_ops` style endpoint names
    pub fn from_endpoint(endpoint: &str) -> Option<Domain> {
        let name = endpoint.strip_suffix("_ops")?;
        Domain::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the caller must prove identity before an action is considered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    Optional,
    Required,
    /// Guests are admitted when the named request field holds a non-empty string
    GuestProof(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPolicy {
    pub authentication: Authentication,
    /// Any-of platform roles; empty means no platform role is needed
    pub platform_roles: &'static [&'static str],
    /// Resource-scoped owner/admin may stand in for the platform role
    pub resource_admin_substitutes: bool,
    /// Request field that, when equal to the caller id, satisfies the role requirement
    /// of an unscoped request
    pub owner_field: Option<&'static str>,
    /// Consult the authorization service
    pub central: bool,
    pub scope: Option<ResourceKind>,
    pub required_fields: &'static [&'static str],
    /// Request field the cache key is derived from
    pub key_field: Option<&'static str>,
}

impl ActionPolicy {
    /// Evaluated for names that match no action: only a platform admin learns the action is unknown.
    pub const FALLBACK: ActionPolicy = ActionPolicy::authenticated().roles(&["admin"]);

    pub const fn public() -> Self {
        Self {
            authentication: Authentication::Optional,
            platform_roles: &[],
            resource_admin_substitutes: false,
            owner_field: None,
            central: false,
            scope: None,
            required_fields: &[],
            key_field: None,
        }
    }

    pub const fn authenticated() -> Self {
        Self {
            authentication: Authentication::Required,
            ..Self::public()
        }
    }

    pub const fn guest_proof(field: &'static str) -> Self {
        Self {
            authentication: Authentication::GuestProof(field),
            ..Self::public()
        }
    }

    pub const fn roles(self, roles: &'static [&'static str]) -> Self {
        Self {
            platform_roles: roles,
            ..self
        }
    }

    pub const fn substitutable(self) -> Self {
        Self {
            resource_admin_substitutes: true,
            ..self
        }
    }

    pub const fn owned_by(self, field: &'static str) -> Self {
        Self {
            owner_field: Some(field),
            ..self
        }
    }

    pub const fn central(self) -> Self {
        Self { central: true, ..self }
    }

    pub const fn scoped(self, kind: ResourceKind) -> Self {
        Self {
            scope: Some(kind),
            ..self
        }
    }

    pub const fn requires(self, fields: &'static [&'static str]) -> Self {
        Self {
            required_fields: fields,
            ..self
        }
    }

    pub const fn keyed(self, field: &'static str) -> Self {
        Self {
            key_field: Some(field),
            ..self
        }
    }
}

const ADMIN: &[&str] = &["admin"];
const MODERATION: &[&str] = &["admin", "moderator"];
const CAMPAIGN: ResourceKind = ResourceKind::Campaign;

macro_rules! actions {
    ($($variant:ident => ($domain:ident, $name:literal)),+ $(,)?) => {
        /// Every action the gateway accepts
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $($variant),+
        }

        impl Action {
            pub const ALL: &'static [Action] = &[$(Action::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Action::$variant => $name),+
                }
            }

            pub fn domain(&self) -> Domain {
                match self {
                    $(Action::$variant => Domain::$domain),+
                }
            }
        }
    };
}

actions! {
    // user
    CreateUser => (User, "create_user"),
    GetUser => (User, "get_user"),
    GetUserByUsername => (User, "get_user_by_username"),
    UpdateUser => (User, "update_user"),
    DeleteUser => (User, "delete_user"),
    AssignRole => (User, "assign_role"),
    RemoveRole => (User, "remove_role"),
    UpdateUserPreferences => (User, "update_preferences"),
    ListSessions => (User, "list_sessions"),
    ListAuditLogs => (User, "list_audit_logs"),
    // campaign
    CreateCampaign => (Campaign, "create_campaign"),
    UpdateCampaign => (Campaign, "update_campaign"),
    DeleteCampaign => (Campaign, "delete_campaign"),
    GetCampaign => (Campaign, "get_campaign"),
    ListCampaigns => (Campaign, "list_campaigns"),
    // content
    CreateContent => (Content, "create_content"),
    UpdateContent => (Content, "update_content"),
    DeleteContent => (Content, "delete_content"),
    GetContent => (Content, "get_content"),
    ListContent => (Content, "list_content"),
    AddReaction => (Content, "add_reaction"),
    AddComment => (Content, "add_comment"),
    ModerateContent => (Content, "moderate_content"),
    // messaging
    SendMessage => (Messaging, "send_message"),
    ListMessages => (Messaging, "list_messages"),
    UpdateMessagingPreferences => (Messaging, "update_preferences"),
    ListThreads => (Messaging, "list_threads"),
    AddChatGroupMember => (Messaging, "add_chat_group_member"),
    RemoveChatGroupMember => (Messaging, "remove_chat_group_member"),
    ListChatGroupMembers => (Messaging, "list_chat_group_members"),
    // waitlist
    CreateEntry => (Waitlist, "create_entry"),
    GetEntry => (Waitlist, "get_entry"),
    UpdateEntry => (Waitlist, "update_entry"),
    ListEntries => (Waitlist, "list_entries"),
    GetStats => (Waitlist, "get_stats"),
    InviteUser => (Waitlist, "invite_user"),
    CheckUsername => (Waitlist, "check_username"),
    ValidateReferral => (Waitlist, "validate_referral"),
    GetLeaderboard => (Waitlist, "get_leaderboard"),
    GetPosition => (Waitlist, "get_position"),
    // search
    Search => (Search, "search"),
    Suggest => (Search, "suggest"),
    // content moderation
    SubmitContentForModeration => (Moderation, "submit_content_for_moderation"),
    GetModerationResult => (Moderation, "get_moderation_result"),
    ListFlaggedContent => (Moderation, "list_flagged_content"),
    ApproveContent => (Moderation, "approve_content"),
    RejectContent => (Moderation, "reject_content"),
    // referral
    CreateReferral => (Referral, "create_referral"),
    GetReferral => (Referral, "get_referral"),
    GetReferralStats => (Referral, "get_referral_stats"),
}

impl Action {
    /// Look up an action by name within one domain
    pub fn parse(domain: Domain, name: &str) -> Option<Action> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.domain() == domain && a.as_str() == name)
    }

    pub fn policy(&self) -> ActionPolicy {
        use ActionPolicy as P;

        match self {
            Action::CreateUser => P::public().requires(&["username", "email", "password"]).keyed("username"),
            Action::GetUser => P::public().requires(&["user_id"]).keyed("user_id"),
            Action::GetUserByUsername => P::public().requires(&["username"]).keyed("username"),
            Action::UpdateUser | Action::DeleteUser => {
                P::authenticated().roles(ADMIN).central().requires(&["user_id"]).keyed("user_id")
            }
            Action::AssignRole | Action::RemoveRole => P::authenticated()
                .roles(ADMIN)
                .central()
                .requires(&["user_id", "role"])
                .keyed("user_id"),
            Action::UpdateUserPreferences | Action::ListSessions => P::authenticated()
                .roles(ADMIN)
                .owned_by("user_id")
                .requires(&["user_id"])
                .keyed("user_id"),
            Action::ListAuditLogs => P::authenticated().roles(ADMIN).central(),

            Action::CreateCampaign => P::authenticated().roles(ADMIN).central().keyed("slug"),
            Action::UpdateCampaign | Action::DeleteCampaign => {
                P::authenticated().roles(ADMIN).substitutable().central().scoped(CAMPAIGN)
            }
            Action::GetCampaign => P::public().scoped(CAMPAIGN),
            Action::ListCampaigns => P::public(),

            Action::CreateContent => P::authenticated().scoped(CAMPAIGN),
            Action::UpdateContent | Action::DeleteContent => P::authenticated()
                .roles(ADMIN)
                .substitutable()
                .owned_by("author_id")
                .scoped(CAMPAIGN)
                .requires(&["id"])
                .keyed("id"),
            Action::GetContent => P::public().requires(&["id"]).keyed("id"),
            Action::ListContent => P::public().scoped(CAMPAIGN),
            Action::AddReaction => P::authenticated().requires(&["content_id"]),
            Action::AddComment => P::guest_proof("device_id").requires(&["content_id"]),
            Action::ModerateContent => P::authenticated().roles(MODERATION).central().requires(&["content_id"]),

            Action::SendMessage => P::guest_proof("device_id").scoped(CAMPAIGN),
            Action::ListMessages => P::public(),
            Action::UpdateMessagingPreferences | Action::ListThreads => P::authenticated()
                .roles(ADMIN)
                .owned_by("user_id")
                .requires(&["user_id"])
                .keyed("user_id"),
            Action::AddChatGroupMember | Action::RemoveChatGroupMember => {
                P::authenticated().roles(ADMIN).substitutable().scoped(CAMPAIGN)
            }
            Action::ListChatGroupMembers => P::public(),

            Action::CreateEntry
            | Action::GetEntry
            | Action::CheckUsername
            | Action::ValidateReferral
            | Action::GetLeaderboard
            | Action::GetPosition => P::public(),
            Action::UpdateEntry | Action::ListEntries | Action::GetStats | Action::InviteUser => {
                P::authenticated().roles(ADMIN).central()
            }

            Action::Search | Action::Suggest => P::public(),

            Action::SubmitContentForModeration | Action::GetModerationResult => P::authenticated()
                .roles(ADMIN)
                .substitutable()
                .owned_by("author_id")
                .scoped(CAMPAIGN)
                .requires(&["author_id"]),
            Action::ListFlaggedContent | Action::ApproveContent | Action::RejectContent => {
                P::authenticated().roles(MODERATION).substitutable().scoped(CAMPAIGN)
            }

            Action::CreateReferral => P::guest_proof("device_hash"),
            Action::GetReferral | Action::GetReferralStats => P::public(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
