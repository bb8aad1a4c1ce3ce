//! HTML for each page. User supplied text goes through `esc`/`attr`; form
//! actions are paths built here from ids and go in as they are.

use std::fmt::Write;

use htmlescape::{encode_attribute as attr, encode_minimal as esc};
use warp::http::StatusCode;

use crate::feedback::Feedback;
use crate::form::{AddFeedbackForm, Errors, LoginForm, RegisterForm, UpdateFeedbackForm};
use crate::user::User;

fn page(title: &str, flash: Option<&str>, body: &str) -> String {
    let flash = flash
        .map(|message| format!("<p class=\"flash\">{}</p>\n", esc(message)))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n\
         {flash}\
         {body}\
         </body>\n\
         </html>\n",
        title = esc(title),
    )
}

struct Field<'a> {
    name: &'static str,
    label: &'static str,
    kind: &'static str,
    value: &'a str,
}

fn form(action: &str, submit: &str, fields: &[Field<'_>], errors: &Errors) -> String {
    let mut out = format!("<form method=\"POST\" action=\"{action}\">\n");

    for field in fields {
        let _ = writeln!(
            out,
            "<label for=\"{name}\">{label}</label>\n\
             <input type=\"{kind}\" id=\"{name}\" name=\"{name}\" value=\"{value}\">",
            name = field.name,
            label = field.label,
            kind = field.kind,
            value = attr(field.value),
        );
        if let Some(message) = errors.for_field(field.name) {
            let _ = writeln!(out, "<small class=\"error\">{}</small>", esc(message));
        }
    }

    let _ = writeln!(out, "<button>{submit}</button>\n</form>");
    out
}

fn post_button(action: &str, label: &str) -> String {
    format!(
        "<form method=\"POST\" action=\"{action}\"><button>{}</button></form>\n",
        esc(label),
    )
}

pub fn registration(form: &RegisterForm, errors: &Errors, flash: Option<&str>) -> String {
    let fields = [
        Field {
            name: "username",
            label: "Username",
            kind: "text",
            value: &form.username,
        },
        Field {
            name: "password",
            label: "Password",
            kind: "password",
            value: "",
        },
        Field {
            name: "email",
            label: "Email Address",
            kind: "email",
            value: &form.email,
        },
        Field {
            name: "first_name",
            label: "First Name",
            kind: "text",
            value: &form.first_name,
        },
        Field {
            name: "last_name",
            label: "Last Name",
            kind: "text",
            value: &form.last_name,
        },
    ];

    let body = format!(
        "<h1>Register</h1>\n{}<a href=\"/login\">Log in</a>\n",
        self::form("/register", "Register", &fields, errors),
    );
    page("Register", flash, &body)
}

pub fn login(form: &LoginForm, errors: &Errors, flash: Option<&str>) -> String {
    let fields = [
        Field {
            name: "username",
            label: "Username",
            kind: "text",
            value: &form.username,
        },
        Field {
            name: "password",
            label: "Password",
            kind: "password",
            value: "",
        },
    ];

    let body = format!(
        "<h1>Log in</h1>\n{}<a href=\"/register\">Register</a>\n",
        self::form("/login", "Log in", &fields, errors),
    );
    page("Log in", flash, &body)
}

/// `viewer` is the logged in user, who gets controls on their own page.
pub fn user(user: &User, feedbacks: &[Feedback], viewer: i64) -> String {
    let owner = viewer == user.id;

    let mut body = format!(
        "<h1>{}</h1>\n\
         <ul>\n\
         <li>Username: {}</li>\n\
         <li>Email: {}</li>\n\
         </ul>\n\
         <h2>Feedback</h2>\n\
         <ul>\n",
        esc(&user.full_name()),
        esc(&user.username),
        esc(&user.email),
    );

    for feedback in feedbacks {
        let _ = write!(
            body,
            "<li><b>{}</b> {}",
            esc(&feedback.title),
            esc(&feedback.content),
        );
        if owner {
            let _ = write!(
                body,
                " <a href=\"/feedback/{id}/update\">Edit</a>\n{}",
                post_button(&format!("/feedback/{}/delete", feedback.id), "Delete"),
                id = feedback.id,
            );
        }
        body.push_str("</li>\n");
    }
    body.push_str("</ul>\n");

    if owner {
        let _ = write!(
            body,
            "<a href=\"/users/{id}/feedback/add\">Add feedback</a>\n{}{}",
            post_button("/logout", "Log out"),
            post_button(&format!("/users/{}/delete", user.id), "Delete account"),
            id = user.id,
        );
    }

    page(&user.username, None, &body)
}

pub fn add_feedback(form: &AddFeedbackForm, errors: &Errors, user: &User) -> String {
    let fields = [
        Field {
            name: "title",
            label: "Title",
            kind: "text",
            value: &form.title,
        },
        Field {
            name: "content",
            label: "Content",
            kind: "text",
            value: &form.content,
        },
    ];

    let body = format!(
        "<h1>Add feedback for {}</h1>\n{}",
        esc(&user.username),
        self::form(&format!("/users/{}/feedback/add", user.id), "Add", &fields, errors),
    );
    page("Add feedback", None, &body)
}

/// Blank fields are submitted to leave the current value alone,
/// so the form starts out blank and shows the current values beside it.
pub fn update_feedback(form: &UpdateFeedbackForm, errors: &Errors, feedback: &Feedback) -> String {
    let fields = [
        Field {
            name: "title",
            label: "Title",
            kind: "text",
            value: &form.title,
        },
        Field {
            name: "content",
            label: "Content",
            kind: "text",
            value: &form.content,
        },
    ];

    let body = format!(
        "<h1>Edit feedback</h1>\n\
         <p><b>{}</b> {}</p>\n{}",
        esc(&feedback.title),
        esc(&feedback.content),
        self::form(&format!("/feedback/{}/update", feedback.id), "Update", &fields, errors),
    );
    page("Edit feedback", None, &body)
}

pub fn denial(message: &str) -> String {
    page(message, None, &format!("<h1>{}</h1>\n", esc(message)))
}

pub fn error(status: StatusCode) -> String {
    let message = status.canonical_reason().unwrap_or("Error");
    page(message, None, &format!("<h1>{} {}</h1>\n", status.as_u16(), esc(message)))
}
