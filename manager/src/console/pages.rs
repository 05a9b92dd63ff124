//! Server-rendered HTML for the console

use std::fmt::Write;
use std::net::Ipv4Addr;

use crate::rule::Rule;

const STYLE: &str = r#"
        body { font: 15px/1.4 system-ui, sans-serif; max-width: 960px; margin: 24px auto; padding: 0 16px; color: #1f2933; background: #f5f7fa; }
        h1 { font-size: 1.5em; margin: 0; }
        h2 { font-size: 1em; margin: 0 0 10px; text-transform: uppercase; letter-spacing: .05em; color: #52606d; }
        .card { background: #fff; border-radius: 6px; box-shadow: 0 1px 3px rgba(0,0,0,.12); padding: 14px 18px; margin: 14px 0; }
        .muted, label { color: #7b8794; font-size: .85em; }
        label { display: block; }
        .ip { font: 1.5em monospace; color: #0b7285; }
        table { width: 100%; border-collapse: collapse; }
        th, td { padding: 6px 8px; border-top: 1px solid #e4e7eb; text-align: left; }
        .grid { display: flex; flex-wrap: wrap; gap: 10px; align-items: flex-end; }
        form.inline { margin: 0; }
        input { padding: 6px; border: 1px solid #cbd2d9; border-radius: 4px; }
        button { padding: 6px 14px; border: 0; border-radius: 4px; background: #0b7285; color: #fff; cursor: pointer; }
        button.danger { background: #c92a2a; }
"#;

/// Escape text for use in element content and double-quoted attributes
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{STYLE}</style>
</head>
<body>
    <h1>Port Proxy Manager</h1>
    <p class="muted" style="margin-top:0"><a href="/">Home</a> &middot; <a href="/list">Rules</a></p>
{body}
</body>
</html>
"#
    )
}

fn add_form(router_ip: Option<Ipv4Addr>) -> String {
    let listen_default = router_ip.map(|ip| ip.to_string()).unwrap_or_default();
    format!(
        r#"    <div class="card">
        <h2>Add Rule</h2>
        <form method="post" action="/add" class="grid">
            <div><label for="rule_name">Rule name</label><input id="rule_name" name="rule_name" required></div>
            <div><label for="listen_address">Listen address</label><input id="listen_address" name="listen_address" value="{listen}" required></div>
            <div><label for="listen_port">Listen port</label><input id="listen_port" name="listen_port" inputmode="numeric" required></div>
            <div><label for="connect_address">Connect address</label><input id="connect_address" name="connect_address" required></div>
            <div><label for="connect_port">Connect port</label><input id="connect_port" name="connect_port" inputmode="numeric" required></div>
            <div><button type="submit">Add</button></div>
        </form>
    </div>
"#,
        listen = escape(&listen_default)
    )
}

const REMOVE_FORM: &str = r#"    <div class="card">
        <h2>Remove Rule</h2>
        <form method="post" action="/remove" class="grid">
            <div><label for="remove_name">Rule name</label><input id="remove_name" name="rule_name" required></div>
            <div><button type="submit" class="danger">Remove</button></div>
        </form>
    </div>
"#;

/// Landing page: this host's LAN address and the add/remove forms
pub fn home(router_ip: Ipv4Addr) -> String {
    let mut body = format!(
        r#"    <div class="card">
        <div class="muted">Router IP</div>
        <div class="ip">{ip}</div>
    </div>
"#,
        ip = router_ip
    );
    body.push_str(&add_form(Some(router_ip)));
    body.push_str(REMOVE_FORM);
    layout("Port Proxy Manager", &body)
}

/// Rule table with a remove button per row
pub fn list(rules: &[Rule]) -> String {
    let mut body = String::from(
        r#"    <div class="card">
        <h2>Rules</h2>
"#,
    );

    if rules.is_empty() {
        body.push_str("        <p class=\"muted\">No rules configured.</p>\n");
    } else {
        body.push_str(
            "        <table>\n            <tr><th>Name</th><th>Listen</th><th>Connect</th><th></th></tr>\n",
        );
        for rule in rules {
            let _ = writeln!(
                body,
                r#"            <tr><td>{name}</td><td>{la}:{lp}</td><td>{ca}:{cp}</td><td><form method="post" action="/remove" class="inline"><input type="hidden" name="rule_name" value="{name}"><button type="submit" class="danger">Remove</button></form></td></tr>"#,
                name = escape(&rule.name),
                la = escape(&rule.listen_address),
                lp = escape(&rule.listen_port),
                ca = escape(&rule.connect_address),
                cp = escape(&rule.connect_port),
            );
        }
        body.push_str("        </table>\n");
    }
    body.push_str("    </div>\n");
    body.push_str(&add_form(None));

    layout("Rules - Port Proxy Manager", &body)
}
