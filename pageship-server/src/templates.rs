//! Text of the LICENSE and README files published alongside the app.

use crate::github::Repository;
use crate::request::Round;

pub fn mit_license(year: i32, holder: &str) -> String {
    format!(
        r#"MIT License

Copyright (c) {year} {holder}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#
    )
}

/// README for a task's repository at the given round.
pub fn readme(
    task: &str,
    brief: &str,
    checks: &[String],
    repo: &Repository,
    round: Round,
) -> String {
    let status = match round {
        Round::Build => "Initial build (round 1).",
        Round::Revise => "Revised (round 2): the application was updated to the brief below.",
    };

    let mut out = format!(
        "# {name}\n\n{status}\n\n## Summary\n{brief}\n\n",
        name = repo.name,
    );

    if !checks.is_empty() {
        out.push_str("## Acceptance checks\n");
        for check in checks {
            out.push_str(&format!("- {check}\n"));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "## Usage\nLive site: {pages}\n\n\
         To run locally, clone {url} and open `index.html` in a browser.\n\n\
         ## Code\nA single `index.html` with embedded CSS and JavaScript, \
         generated for task `{task}`.\n\n\
         ## License\nMIT\n",
        pages = repo.pages_url,
        url = repo.url,
    ));
    out
}
