//! Organizations: classes, project groups and courses that share files.

use crate::classify::is_valid_course_code;
use crate::error::{Error, Result};
use crate::file::uuid_id;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(
    /// Unique identifier for an organization.
    OrgId,
    "organization id"
);

/// Maximum number of members an organization may be configured for.
pub const MAX_MEMBERS_LIMIT: u32 = 1000;

/// Default member cap for new organizations.
pub const DEFAULT_MAX_MEMBERS: u32 = 50;

/// Kind of organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgType {
    Klasse,
    Prosjektgruppe,
    Emne,
    Avdeling,
    Studiegruppe,
}

impl OrgType {
    pub const ALL: [OrgType; 5] = [
        Self::Klasse,
        Self::Prosjektgruppe,
        Self::Emne,
        Self::Avdeling,
        Self::Studiegruppe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Klasse => "klasse",
            Self::Prosjektgruppe => "prosjektgruppe",
            Self::Emne => "emne",
            Self::Avdeling => "avdeling",
            Self::Studiegruppe => "studiegruppe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Prefix used for join codes.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::Klasse => "KL",
            Self::Prosjektgruppe => "PG",
            Self::Emne => "EM",
            Self::Studiegruppe => "SG",
            Self::Avdeling => "ORG",
        }
    }
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a member within an organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "moderator")]
    Moderator,
    #[serde(rename = "lærer")]
    Laerer,
    #[serde(rename = "assistent")]
    Assistent,
    #[serde(rename = "medlem")]
    Medlem,
    #[serde(rename = "student")]
    Student,
}

impl MemberRole {
    pub const ALL: [MemberRole; 6] = [
        Self::Admin,
        Self::Moderator,
        Self::Laerer,
        Self::Assistent,
        Self::Medlem,
        Self::Student,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Laerer => "lærer",
            Self::Assistent => "assistent",
            Self::Medlem => "medlem",
            Self::Student => "student",
        }
    }

    /// Strict parse; fails on unknown roles.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::InvalidRole(s.to_string()))
    }

    /// Lenient parse used for stored rows: unknown roles act as `medlem`.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Medlem)
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Self::Admin => &[
                ManageMembers,
                ManageFiles,
                ManageOrg,
                DeleteOrg,
                UploadFiles,
                DownloadFiles,
                ViewMembers,
                InviteMembers,
            ],
            Self::Moderator | Self::Laerer => &[
                ManageFiles,
                UploadFiles,
                DownloadFiles,
                ViewMembers,
                InviteMembers,
            ],
            Self::Assistent | Self::Medlem | Self::Student => {
                &[UploadFiles, DownloadFiles, ViewMembers]
            }
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Roles that only members with `manage_members` may hand out.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin | Self::Moderator)
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership status. Only active members get access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Something a member may do inside an organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageMembers,
    ManageFiles,
    ManageOrg,
    DeleteOrg,
    UploadFiles,
    DownloadFiles,
    ViewMembers,
    InviteMembers,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageMembers => "manage_members",
            Self::ManageFiles => "manage_files",
            Self::ManageOrg => "manage_org",
            Self::DeleteOrg => "delete_org",
            Self::UploadFiles => "upload_files",
            Self::DownloadFiles => "download_files",
            Self::ViewMembers => "view_members",
            Self::InviteMembers => "invite_members",
        }
    }
}

/// Generate a human-friendly join code, e.g. `KLFYSI7Q2X`.
///
/// Prefix by type, then up to four letters of the name, then four random
/// base-36 characters.
pub fn generate_org_code(org_type: OrgType, name: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let letters: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || matches!(c, 'Æ' | 'Ø' | 'Å'))
        .take(4)
        .collect();

    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{}{letters}{suffix}", org_type.code_prefix())
}

/// Input for creating an organization.
#[derive(Clone, Debug, Deserialize)]
pub struct OrganizationDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub is_public: bool,
}

impl OrganizationDraft {
    /// Validate every field, reporting all problems at once.
    pub fn validate(&self) -> Result<OrgType> {
        let mut errors = Vec::new();

        let name_len = self.name.trim().chars().count();
        if name_len < 2 {
            errors.push("Organisasjonsnavn må være minst 2 tegn".to_string());
        } else if name_len > 100 {
            errors.push("Organisasjonsnavn kan ikke være lengre enn 100 tegn".to_string());
        }

        let org_type = OrgType::parse(&self.org_type);
        if org_type.is_none() {
            errors.push("Ugyldig organisasjonstype".to_string());
        }

        if let Some(max) = self.max_members
            && !(1..=MAX_MEMBERS_LIMIT).contains(&max)
        {
            errors.push(format!(
                "Maksimalt antall medlemmer må være mellom 1 og {MAX_MEMBERS_LIMIT}"
            ));
        }

        if let Some(code) = self.course_code.as_deref()
            && !is_valid_course_code(&code.trim().to_ascii_uppercase())
        {
            errors.push("Ugyldig emnekode format (f.eks. TKT4140)".to_string());
        }

        match org_type {
            Some(org_type) if errors.is_empty() => Ok(org_type),
            _ => Err(Error::InvalidOrganization(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, org_type: &str) -> OrganizationDraft {
        OrganizationDraft {
            name: name.to_string(),
            org_type: org_type.to_string(),
            description: None,
            course_code: None,
            max_members: None,
            is_public: false,
        }
    }

    #[test]
    fn test_role_permissions() {
        assert_eq!(MemberRole::Admin.permissions().len(), 8);
        assert!(MemberRole::Laerer.has_permission(Permission::ManageFiles));
        assert!(MemberRole::Moderator.has_permission(Permission::InviteMembers));
        assert!(!MemberRole::Moderator.has_permission(Permission::ManageMembers));
        assert!(MemberRole::Student.has_permission(Permission::UploadFiles));
        assert!(!MemberRole::Student.has_permission(Permission::InviteMembers));
        assert_eq!(
            MemberRole::Assistent.permissions(),
            MemberRole::Medlem.permissions()
        );
    }

    #[test]
    fn test_unknown_role_falls_back_to_medlem() {
        assert_eq!(MemberRole::parse_or_default("lærer"), MemberRole::Laerer);
        assert_eq!(MemberRole::parse_or_default("owner"), MemberRole::Medlem);
        assert!(MemberRole::parse("owner").is_err());
    }

    #[test]
    fn test_role_serde_uses_norwegian_names() {
        let json = serde_json::to_string(&MemberRole::Laerer).unwrap();
        assert_eq!(json, "\"lærer\"");
        let role: MemberRole = serde_json::from_str("\"assistent\"").unwrap();
        assert_eq!(role, MemberRole::Assistent);
    }

    #[test]
    fn test_generate_org_code() {
        let code = generate_org_code(OrgType::Klasse, "fysikk 1");
        assert!(code.starts_with("KLFYSI"), "{code}");
        assert_eq!(code.len(), 10);
        assert!(
            code[6..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );

        let code = generate_org_code(OrgType::Avdeling, "Ås");
        assert!(code.starts_with("ORGÅS"), "{code}");

        let code = generate_org_code(OrgType::Studiegruppe, "42");
        assert!(code.starts_with("SG"));
        assert_eq!(code.len(), 6);
    }

    #[test]
    fn test_codes_are_random() {
        let a = generate_org_code(OrgType::Emne, "Mekanikk");
        let b = generate_org_code(OrgType::Emne, "Mekanikk");
        let c = generate_org_code(OrgType::Emne, "Mekanikk");
        assert!(a != b || b != c);
    }

    #[test]
    fn test_validate_draft_ok() {
        let mut d = draft("Fysikk 1A", "klasse");
        d.course_code = Some("FY1001".to_string());
        d.max_members = Some(30);
        assert_eq!(d.validate().unwrap(), OrgType::Klasse);
    }

    #[test]
    fn test_validate_draft_collects_errors() {
        let mut d = draft(" x ", "klubb");
        d.course_code = Some("fy1001".to_string());
        d.max_members = Some(0);
        match d.validate() {
            Err(Error::InvalidOrganization(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_draft_name_too_long() {
        let d = draft(&"a".repeat(101), "emne");
        assert!(d.validate().is_err());
        let d = draft(&"a".repeat(100), "emne");
        assert!(d.validate().is_ok());
    }
}
