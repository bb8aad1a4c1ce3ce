use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::feedback::FeedbackUpdate;

/// Messages for the fields that failed validation, at most one per field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Errors(Vec<(&'static str, &'static str)>);

impl Errors {
    pub fn for_field(&self, field: &str) -> Option<&'static str> {
        self.0
            .iter()
            .find(|(name, _)| *name == field)
            .map(|&(_, message)| message)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

enum Rule {
    Required(&'static str),
    MaxLen(usize, &'static str),
    Email(&'static str),
}

impl Rule {
    fn check(&self, value: &str) -> Result<(), &'static str> {
        let (ok, message) = match *self {
            Rule::Required(message) => (!value.is_empty(), message),
            Rule::MaxLen(max, message) => (value.chars().count() <= max, message),
            Rule::Email(message) => (valid_email(value), message),
        };

        if ok {
            Ok(())
        } else {
            Err(message)
        }
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles"));

fn valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Default)]
struct Validator(Errors);

impl Validator {
    /// Rules run in order, a field reports only its first failure.
    fn field(mut self, name: &'static str, value: &str, rules: &[Rule]) -> Self {
        if let Err(message) = rules.iter().try_for_each(|rule| rule.check(value)) {
            self.0 .0.push((name, message));
        }
        self
    }

    fn finish(self) -> Result<(), Errors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}

const USERNAME_TOO_LONG: &str = "Username can't be longer than 20 characters.";
const EMAIL_REQUIRED: &str =
    "Please provide a valid email address that's no longer than 50 characters.";
const NAME_TOO_LONG: &str = "Name provided can't be longer than 30 characters.";
const TITLE_TOO_LONG: &str = "Title can't be longer than 100 characters.";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), Errors> {
        use Rule::*;

        Validator::default()
            .field(
                "username",
                &self.username,
                &[
                    Required("Please provide a unique username no longer than 20 characters."),
                    MaxLen(20, USERNAME_TOO_LONG),
                ],
            )
            .field(
                "password",
                &self.password,
                &[Required("Please provide a password.")],
            )
            .field(
                "email",
                &self.email,
                &[
                    Required(EMAIL_REQUIRED),
                    MaxLen(50, "Email address can't be longer than 50 characters."),
                    Email("Email provided is not valid."),
                ],
            )
            .field(
                "first_name",
                &self.first_name,
                &[
                    Required("Please provide your first name."),
                    MaxLen(30, NAME_TOO_LONG),
                ],
            )
            .field(
                "last_name",
                &self.last_name,
                &[
                    Required("Please provide your last name."),
                    MaxLen(30, NAME_TOO_LONG),
                ],
            )
            .finish()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), Errors> {
        use Rule::*;

        Validator::default()
            .field(
                "username",
                &self.username,
                &[
                    Required("Please provide your username."),
                    MaxLen(20, USERNAME_TOO_LONG),
                ],
            )
            .field(
                "password",
                &self.password,
                &[Required("Please provide your password.")],
            )
            .finish()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AddFeedbackForm {
    pub title: String,
    pub content: String,
}

impl AddFeedbackForm {
    pub fn validate(&self) -> Result<(), Errors> {
        use Rule::*;

        Validator::default()
            .field(
                "title",
                &self.title,
                &[
                    Required("Please provide a title."),
                    MaxLen(100, TITLE_TOO_LONG),
                ],
            )
            .field(
                "content",
                &self.content,
                &[Required("Please provide text for content.")],
            )
            .finish()
    }
}

/// Both fields may be left blank to keep their current value.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateFeedbackForm {
    pub title: String,
    pub content: String,
}

impl UpdateFeedbackForm {
    pub fn validate(&self) -> Result<(), Errors> {
        Validator::default()
            .field("title", &self.title, &[Rule::MaxLen(100, TITLE_TOO_LONG)])
            .finish()
    }

    pub fn into_update(self) -> FeedbackUpdate {
        FeedbackUpdate::from_fields(self.title, self.content)
    }
}
