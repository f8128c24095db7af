use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an identifier from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} must not be empty", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

// Remote identifiers are opaque: the API decides their format, we only
// require them to be non-empty.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        kind: stringify!($name),
                    });
                }
                Ok(Self(trimmed.to_owned()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a course.
    CourseId
);
string_id!(
    /// Unique identifier for a lesson.
    LessonId
);
string_id!(
    /// Unique identifier for a student (or a parent's child account).
    StudentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_id_display() {
        let id = CourseId::new("course-42");
        assert_eq!(id.to_string(), "course-42");
    }

    #[test]
    fn lesson_id_from_str_trims() {
        let id: LessonId = "  lesson-1 ".parse().unwrap();
        assert_eq!(id, LessonId::new("lesson-1"));
    }

    #[test]
    fn empty_id_is_rejected() {
        let result = "   ".parse::<StudentId>();
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "StudentId must not be empty"
        );
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&CourseId::new("c1")).unwrap();
        assert_eq!(json, "\"c1\"");
        let back: CourseId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CourseId::new("c1"));
    }

    #[test]
    fn debug_names_the_kind() {
        assert_eq!(format!("{:?}", LessonId::new("l9")), "LessonId(l9)");
    }
}
