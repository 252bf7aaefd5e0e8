/// Declares a TEXT-backed state/choice enum with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize, utoipa::ToSchema,
        )]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::errors::AppError::validation(format!(
                        "invalid {} value: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

pub mod audit;
pub mod checklist;
pub mod inspection;
pub mod issue;
pub mod notification;
pub mod object;
pub mod offline;
pub mod org;
pub mod user;

pub use checklist::{ChecklistStatus, DailyChecklist, DailyStatus, ItemStatus, OpeningChecklist};
pub use inspection::InspectionVisit;
pub use issue::{Issue, IssueKind, IssueStatus};
pub use object::{ConstructionObject, ObjectStatus};
pub use offline::OfflineMeta;
