//! # Repository Scaffolding
//!
//! Deterministic naming plus the auxiliary files every published repository
//! carries: MIT license, README, Pages deploy workflow, `.nojekyll`, and a
//! placeholder entry point in case generation produced nothing at the root.

use std::path::Path;

use chrono::{Datelike, Utc};
use tokio::fs;

use crate::error::Result;

const MIT_TEMPLATE: &str = r#"MIT License

Copyright (c) {year} {owner}

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
"#;

const PAGES_WORKFLOW: &str = r#"name: Deploy static site

on:
  push:
    branches: ["main"]
  workflow_dispatch:

permissions:
  contents: read
  pages: write
  id-token: write

concurrency:
  group: "pages"
  cancel-in-progress: false

jobs:
  deploy:
    environment:
      name: github-pages
      url: ${{ steps.deployment.outputs.page_url }}
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v4
      - name: Setup Pages
        uses: actions/configure-pages@v5
      - name: Upload artifact
        uses: actions/upload-pages-artifact@v3
        with:
          path: .
      - name: Deploy to GitHub Pages
        id: deployment
        uses: actions/deploy-pages@v4
"#;

const PLACEHOLDER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <title>Site under construction</title>
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <style>
      body { font-family: system-ui, sans-serif; display: grid; place-items: center; min-height: 100vh; margin: 0; background: #f4f6fb; color: #1f2937; }
      main { text-align: center; padding: 2rem; max-width: 640px; }
      h1 { font-size: clamp(2rem, 5vw, 3.5rem); margin-bottom: 1rem; }
      p { line-height: 1.6; }
      code { background: rgba(0,0,0,0.08); padding: 0.2rem 0.4rem; border-radius: 4px; }
    </style>
  </head>
  <body>
    <main>
      <h1>Deployment in progress&hellip;</h1>
      <p>The automated builder is preparing this project. Refresh in a moment to see the live site.</p>
      <p>If you own this repo, make sure pushes reach the <code>main</code> branch and GitHub Pages is enabled.</p>
    </main>
  </body>
</html>
"#;

/// Normalized, hyphenated identifier derived from a human-readable task name.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Repository name for round 1: task slug plus the first six lowercased nonce
/// characters. Deterministic for a given task name and nonce; round 2 must
/// resolve the name from stored state instead of calling this again.
pub fn repo_name_for(task: &str, nonce: &str) -> String {
    let fragment: String = nonce.chars().take(6).collect();
    format!("{}-{}", slugify(task), fragment.to_lowercase())
}

/// Write the auxiliary files into a generated content tree.
pub async fn write_aux_files(
    dir: &Path,
    owner: &str,
    repo_name: &str,
    pages_url: &str,
    brief: &str,
    round: u32,
) -> Result<()> {
    write_license(dir, owner).await?;
    write_pages_workflow(dir).await?;
    write_readme(dir, repo_name, pages_url, brief, round).await?;
    fs::write(dir.join(".nojekyll"), "").await?;
    ensure_entrypoint(dir).await?;
    Ok(())
}

async fn write_license(dir: &Path, owner: &str) -> Result<()> {
    let owner = if owner.trim().is_empty() {
        "Maintainer"
    } else {
        owner
    };
    let text = MIT_TEMPLATE
        .replace("{year}", &Utc::now().year().to_string())
        .replace("{owner}", owner);
    fs::write(dir.join("LICENSE"), text).await?;
    Ok(())
}

async fn write_pages_workflow(dir: &Path) -> Result<()> {
    let workflows = dir.join(".github").join("workflows");
    fs::create_dir_all(&workflows).await?;
    fs::write(workflows.join("pages.yml"), PAGES_WORKFLOW).await?;
    Ok(())
}

async fn write_readme(
    dir: &Path,
    repo_name: &str,
    pages_url: &str,
    brief: &str,
    round: u32,
) -> Result<()> {
    let summary = if brief.trim().is_empty() {
        "Generated static site"
    } else {
        brief.trim()
    };
    let content = format!(
        "# {repo_name}\n\n\
         ## Summary\n{summary}\n\n\
         ## Setup\n\
         1. Clone the repository.\n\
         2. Open `index.html` in a modern browser or serve via any static host.\n\n\
         ## Usage\n\
         - Visit {pages_url}\n\
         - Update `index.html` to iterate quickly, then push changes to redeploy GitHub Pages.\n\n\
         ## Code Explanation\n\
         This project was generated automatically from the brief provided in Round {round}. \
         The `index.html` file contains a self-contained static experience. Supporting files \
         such as the MIT license and README are managed programmatically to keep history clean.\n\n\
         ## License\n\
         Released under the MIT License. See `LICENSE` for details.\n"
    );
    fs::write(dir.join("README.md"), content).await?;
    Ok(())
}

/// Write a placeholder index.html only when generation left none behind.
async fn ensure_entrypoint(dir: &Path) -> Result<()> {
    let path = dir.join("index.html");
    if fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(());
    }
    fs::write(path, PLACEHOLDER_HTML).await?;
    Ok(())
}
