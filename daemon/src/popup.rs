//! Marker popup markup.

use crate::config::PopupConfig;
use shared::Claim;

pub const ADMIN_LABEL: &str = "Administrator";

/// Label shown on the map for a claim.
pub fn marker_label(claim: &Claim) -> &str {
    if claim.admin {
        ADMIN_LABEL
    } else {
        &claim.owner_name
    }
}

/// Builds the info-window HTML for a claim.
pub fn describe(claim: &Claim, is_child: bool, popup: &PopupConfig) -> String {
    let mut title = if claim.admin {
        "Administrator claim".to_string()
    } else {
        format!("{}'s claim", escape_html(&claim.owner_name))
    };
    if is_child {
        title.push_str(" (subdivision)");
    }

    let avatar = if popup.show_avatar && !claim.admin {
        format!(
            "<img src=\"{}\" class=\"claimavatar\"/> ",
            escape_html(&avatar_url(&popup.avatar_url, &claim.owner_name))
        )
    } else {
        String::new()
    };

    format!(
        "<div class=\"regioninfo\"><div class=\"infowindow\">{}<span style=\"font-weight:bold;\">{}</span><br/></div></div>",
        avatar, title
    )
}

fn avatar_url(template: &str, owner: &str) -> String {
    let encoded: String = owner
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();
    template.replace("{owner}", &encoded)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
