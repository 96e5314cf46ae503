//! Mail templates for archive outcomes.
//!
//! Every failure cause has a user-facing template and a support-desk
//! template; the desk copy carries the machine detail the user copy leaves
//! out. User-facing mails render as HTML, desk mails as plain text.

use serde::{Deserialize, Serialize};

use archivio_common::types::{FailureCause, NodeId, Provider, RegistrationId, UserId};

/// A rendered mail ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Errors recorded for one failed provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: Provider,
    pub errors: Vec<String>,
}

/// Cause-specific detail carried into template rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyDetail {
    /// Providers that failed, with the errors the gateway reported
    Failures(Vec<ProviderFailure>),
    /// Totals that tripped the size gate
    SizeExceeded { disk_usage: u64, max: u64 },
    /// No extra detail (success, stalled)
    None,
}

/// Everything a template needs to render
#[derive(Debug, Clone)]
pub struct NotifyContext {
    pub user: UserId,
    pub user_email: String,
    pub registration: RegistrationId,
    pub title: String,
    pub source: NodeId,
    pub detail: NotifyDetail,
}

/// Mail template for one outcome and audience
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    CopyErrorUser,
    CopyErrorDesk,
    SizeExceededUser,
    SizeExceededDesk,
    StalledUser,
    StalledDesk,
    ArchiveSuccess,
}

impl Template {
    /// The user and desk templates for a failure cause.
    #[must_use]
    pub fn user_desk_pair(cause: FailureCause) -> (Self, Self) {
        match cause {
            FailureCause::Copy => (Self::CopyErrorUser, Self::CopyErrorDesk),
            FailureCause::SizeExceeded => (Self::SizeExceededUser, Self::SizeExceededDesk),
            FailureCause::Stalled => (Self::StalledUser, Self::StalledDesk),
        }
    }

    /// User-facing mails render as HTML, desk mails as plain text.
    #[must_use]
    pub fn is_html(&self) -> bool {
        matches!(
            self,
            Self::CopyErrorUser
                | Self::SizeExceededUser
                | Self::StalledUser
                | Self::ArchiveSuccess
        )
    }

    #[must_use]
    pub fn subject(&self, ctx: &NotifyContext) -> String {
        match self {
            Self::CopyErrorUser | Self::SizeExceededUser | Self::StalledUser => {
                format!("Issue registering {}", ctx.title)
            }
            Self::ArchiveSuccess => format!("Registration of {} complete", ctx.title),
            Self::CopyErrorDesk | Self::SizeExceededDesk | Self::StalledDesk => {
                format!("[auto] Archive failure: {}", ctx.registration)
            }
        }
    }

    #[must_use]
    pub fn body(&self, ctx: &NotifyContext, support_addr: &str) -> String {
        match self {
            Self::CopyErrorUser => format!(
                "<p>Hello,</p>\
                 <p>An error occurred while archiving the files in your registration \
                 of <b>{title}</b>. The registration could not be completed and has \
                 been removed.</p>\
                 {failures}\
                 <p>You can register again once the problem is resolved. If you need \
                 help, contact <a href=\"mailto:{support}\">{support}</a>.</p>",
                title = ctx.title,
                failures = render_failures_html(&ctx.detail),
                support = support_addr,
            ),
            Self::SizeExceededUser => format!(
                "<p>Hello,</p>\
                 <p>Your registration of <b>{title}</b> could not be archived because \
                 its files {size_line}. The registration has been removed.</p>\
                 <p>Consider registering a smaller selection, or contact \
                 <a href=\"mailto:{support}\">{support}</a> to raise the limit.</p>",
                title = ctx.title,
                size_line = render_size_line(&ctx.detail),
                support = support_addr,
            ),
            Self::StalledUser => format!(
                "<p>Hello,</p>\
                 <p>Archiving the files of your registration of <b>{title}</b> did \
                 not finish within the allowed time. The registration has been \
                 removed.</p>\
                 <p>You can register again. If this keeps happening, contact \
                 <a href=\"mailto:{support}\">{support}</a>.</p>",
                title = ctx.title,
                support = support_addr,
            ),
            Self::ArchiveSuccess => format!(
                "<p>Hello,</p>\
                 <p>All files in your registration of <b>{title}</b> have been \
                 archived successfully.</p>",
                title = ctx.title,
            ),
            Self::CopyErrorDesk => format!(
                "Archive copy failure.\n\
                 \n\
                 registration: {registration}\n\
                 source node:  {source}\n\
                 initiator:    {user} <{email}>\n\
                 {failures}",
                registration = ctx.registration,
                source = ctx.source,
                user = ctx.user,
                email = ctx.user_email,
                failures = render_failures_text(&ctx.detail),
            ),
            Self::SizeExceededDesk => format!(
                "Archive aborted before copy: size limit exceeded.\n\
                 \n\
                 registration: {registration}\n\
                 source node:  {source}\n\
                 initiator:    {user} <{email}>\n\
                 {size_line}\n",
                registration = ctx.registration,
                source = ctx.source,
                user = ctx.user,
                email = ctx.user_email,
                size_line = render_size_line(&ctx.detail),
            ),
            Self::StalledDesk => format!(
                "Archive stalled past the configured timeout.\n\
                 \n\
                 registration: {registration}\n\
                 source node:  {source}\n\
                 initiator:    {user} <{email}>\n",
                registration = ctx.registration,
                source = ctx.source,
                user = ctx.user,
                email = ctx.user_email,
            ),
        }
    }

    /// Render a full message for this template.
    #[must_use]
    pub fn render(&self, ctx: &NotifyContext, to: &str, from: &str, support_addr: &str) -> Message {
        Message {
            to: to.to_string(),
            from: from.to_string(),
            subject: self.subject(ctx),
            body: self.body(ctx, support_addr),
            html: self.is_html(),
        }
    }
}

fn render_failures_html(detail: &NotifyDetail) -> String {
    let NotifyDetail::Failures(failures) = detail else {
        return String::new();
    };
    let items: String = failures
        .iter()
        .map(|f| {
            if f.errors.is_empty() {
                format!("<li>{}</li>", f.provider.display_name())
            } else {
                format!(
                    "<li>{}: {}</li>",
                    f.provider.display_name(),
                    f.errors.join("; ")
                )
            }
        })
        .collect();
    format!("<ul>{items}</ul>")
}

fn render_failures_text(detail: &NotifyDetail) -> String {
    let NotifyDetail::Failures(failures) = detail else {
        return String::new();
    };
    failures
        .iter()
        .map(|f| format!("  {}: {}\n", f.provider, f.errors.join("; ")))
        .collect()
}

fn render_size_line(detail: &NotifyDetail) -> String {
    match detail {
        NotifyDetail::SizeExceeded { disk_usage, max } => {
            format!("total {disk_usage} bytes against a limit of {max} bytes")
        }
        _ => String::new(),
    }
}
