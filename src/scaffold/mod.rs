//! Project Scaffolder — 고정된 디렉토리/파일 레이아웃을 (재)작성합니다.
//!
//! 파일 내용은 불활성 데이터입니다. 여러 번 실행해도 결과가 같아야 하므로
//! 내용이 같은 파일은 건드리지 않고, `overwrite = false`인 플레이스홀더는
//! 파일이 없을 때만 생성합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{ScaffoldConfig, ScaffoldFile};

/// What a scaffold run changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScaffoldReport {
    pub created_dirs: Vec<PathBuf>,
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

pub trait Scaffolder: Send + Sync {
    fn scaffold(&self, project_dir: &Path) -> Result<ScaffoldReport>;
}

/// Writes the configured layout, or the built-in Next.js layout when the
/// config lists nothing.
pub struct TemplateScaffolder {
    dirs: Vec<String>,
    files: Vec<ScaffoldFile>,
}

impl TemplateScaffolder {
    pub fn new(dirs: Vec<String>, files: Vec<ScaffoldFile>) -> Self {
        Self { dirs, files }
    }

    pub fn from_config(cfg: &ScaffoldConfig) -> Self {
        if cfg.dirs.is_empty() && cfg.files.is_empty() {
            Self::builtin()
        } else {
            Self::new(cfg.dirs.clone(), cfg.files.clone())
        }
    }

    pub fn builtin() -> Self {
        let dirs = [
            "public",
            "src/app",
            "src/app/api",
            "src/components",
            "src/services",
            "src/types",
            "src/utils",
        ]
        .iter()
        .map(|d| d.to_string())
        .collect();

        let files = vec![
            file("next.config.js", NEXT_CONFIG, true),
            file("tsconfig.json", TSCONFIG, true),
            file("src/app/layout.tsx", LAYOUT_TSX, false),
            file("src/app/page.tsx", PAGE_TSX, false),
        ];
        Self::new(dirs, files)
    }
}

fn file(path: &str, contents: &str, overwrite: bool) -> ScaffoldFile {
    ScaffoldFile {
        path: path.to_string(),
        contents: contents.to_string(),
        overwrite,
    }
}

impl Scaffolder for TemplateScaffolder {
    fn scaffold(&self, project_dir: &Path) -> Result<ScaffoldReport> {
        let mut report = ScaffoldReport::default();

        for dir in &self.dirs {
            let path = project_dir.join(dir);
            if !path.is_dir() {
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report.created_dirs.push(path);
            }
        }

        for f in &self.files {
            let path = project_dir.join(&f.path);
            let existing = std::fs::read_to_string(&path).ok();
            let skip = match &existing {
                Some(current) => !f.overwrite || *current == f.contents,
                None => false,
            };
            if skip {
                report.unchanged.push(path);
                continue;
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, &f.contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::debug!("Wrote {}", path.display());
            report.written.push(path);
        }

        tracing::info!(
            "Scaffold: {} dirs created, {} files written, {} unchanged",
            report.created_dirs.len(),
            report.written.len(),
            report.unchanged.len()
        );
        Ok(report)
    }
}

// ── Built-in templates ─────────────────────────────────────

const NEXT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
const nextConfig = {
  reactStrictMode: true,
  env: {
    PORT: 3001
  },
  experimental: {
    swcMinify: true,
  },
}

module.exports = nextConfig
"#;

const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "es2017",
    "lib": ["dom", "dom.iterable", "esnext"],
    "allowJs": true,
    "skipLibCheck": true,
    "strict": true,
    "noEmit": true,
    "esModuleInterop": true,
    "module": "esnext",
    "moduleResolution": "bundler",
    "resolveJsonModule": true,
    "isolatedModules": true,
    "jsx": "preserve",
    "incremental": true,
    "plugins": [{ "name": "next" }],
    "paths": { "@/*": ["./src/*"] }
  },
  "include": ["next-env.d.ts", "**/*.ts", "**/*.tsx", ".next/types/**/*.ts"],
  "exclude": ["node_modules"]
}
"#;

const LAYOUT_TSX: &str = r#"export default function RootLayout({ children }: { children: React.ReactNode }) {
  return (
    <html lang="en">
      <body>{children}</body>
    </html>
  );
}
"#;

const PAGE_TSX: &str = r#"export default function Home() {
  return <main>Dashboard</main>;
}
"#;
