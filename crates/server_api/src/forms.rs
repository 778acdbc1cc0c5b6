use storage::{StoredGroup, StoredUser, StoredWorkspace};

/// Replacement body for the assignment modal's form area. The leading blank
/// option is the unselected state of the dropdown.
pub(crate) fn change_workspace_select(workspaces: &[&StoredWorkspace]) -> String {
    let mut html =
        String::from("<select id=\"id_workspaces\" name=\"workspaces\" class=\"form-control\">\n");
    html.push_str("<option value=\"\">-----------</option>\n");
    for workspace in workspaces {
        push_option(&mut html, workspace.workspace_id.0, &workspace.title);
    }
    html.push_str("</select>");
    html
}

pub(crate) fn user_multi_select(users: &[StoredUser]) -> String {
    let mut html = String::from(
        "<select id=\"id_users\" name=\"users\" class=\"form-control\" multiple>\n",
    );
    for user in users {
        push_option(&mut html, user.user_id.0, &user.username);
    }
    html.push_str("</select>");
    html
}

pub(crate) fn group_multi_select(groups: &[StoredGroup]) -> String {
    let mut html = String::from(
        "<select id=\"id_groups\" name=\"groups\" class=\"form-control\" multiple>\n",
    );
    for group in groups {
        push_option(&mut html, group.group_id.0, &group.name);
    }
    html.push_str("</select>");
    html
}

fn push_option(html: &mut String, value: i64, label: &str) {
    html.push_str("<option value=\"");
    html.push_str(&value.to_string());
    html.push_str("\">");
    html.push_str(&escape(label));
    html.push_str("</option>\n");
}

/// Titles and usernames come from users; anything markup-significant must be
/// neutralized before the fragment is injected into a page.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::domain::{GroupId, UserId, WorkspaceId};

    fn workspace(id: i64, title: &str) -> StoredWorkspace {
        StoredWorkspace {
            workspace_id: WorkspaceId(id),
            title: title.to_string(),
            owner_user_id: UserId(1),
            is_public: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn workspace_select_starts_with_blank_option() {
        let first = workspace(3, "Archive");
        let second = workspace(7, "Drafts");
        let html = change_workspace_select(&[&first, &second]);
        assert!(html.starts_with(
            "<select id=\"id_workspaces\" name=\"workspaces\" class=\"form-control\">\n<option value=\"\">-----------</option>"
        ));
        assert!(html.contains("<option value=\"3\">Archive</option>"));
        assert!(html.contains("<option value=\"7\">Drafts</option>"));
        assert!(html.ends_with("</select>"));
    }

    #[test]
    fn option_labels_are_escaped() {
        let tricky = workspace(1, "R&D <beta> \"x\"");
        let html = change_workspace_select(&[&tricky]);
        assert!(html.contains("R&amp;D &lt;beta&gt; &quot;x&quot;"));
        assert!(!html.contains("<beta>"));
    }

    #[test]
    fn user_select_is_multiple_and_has_no_blank_option() {
        let users = vec![StoredUser {
            user_id: UserId(5),
            username: "o'neill".to_string(),
            is_superuser: false,
        }];
        let html = user_multi_select(&users);
        assert!(html.starts_with("<select id=\"id_users\" name=\"users\" class=\"form-control\" multiple>"));
        assert!(html.contains("<option value=\"5\">o&#x27;neill</option>"));
        assert!(!html.contains("-----------"));
    }

    #[test]
    fn group_select_lists_every_group() {
        let groups = vec![
            StoredGroup {
                group_id: GroupId(2),
                name: "editors".to_string(),
                is_builtin: false,
            },
            StoredGroup {
                group_id: GroupId(4),
                name: "reviewers".to_string(),
                is_builtin: false,
            },
        ];
        let html = group_multi_select(&groups);
        assert!(html.contains("<option value=\"2\">editors</option>"));
        assert!(html.contains("<option value=\"4\">reviewers</option>"));
    }
}
