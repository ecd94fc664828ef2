//! Project templates seeded into fresh composes.

/// One file seeded into a new workspace.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFile {
    pub path: &'static str,
    pub content: &'static str,
}

/// A provisionable project template: the compose file plus seed files.
#[derive(Debug, Clone, Copy)]
pub struct ProjectTemplate {
    pub id: &'static str,
    pub compose_file: &'static str,
    pub files: &'static [TemplateFile],
}

const VITE_REACT_COMPOSE: &str = r#"services:
  app:
    image: node:20-alpine
    working_dir: /app
    command: sh -c "npm install && npm run dev -- --host 0.0.0.0 --port 4173"
    ports:
      - "4173:4173"
    volumes:
      - ./:/app
"#;

const VITE_REACT_PACKAGE_JSON: &str = r#"{
  "name": "bolt-workspace",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.4",
    "vite": "^6.0.0"
  }
}
"#;

const VITE_REACT_VITE_CONFIG: &str = r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
  server: {
    host: true,
    port: 4173,
  },
});
"#;

const VITE_REACT_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Bolt Workspace</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const VITE_REACT_MAIN: &str = r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App.jsx';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>
);
"#;

const VITE_REACT_APP: &str = r#"function App() {
  return (
    <main>
      <h1>Hello from your workspace</h1>
      <p>Edit <code>src/App.jsx</code> to get started.</p>
    </main>
  );
}

export default App;
"#;

const VITE_REACT_CSS: &str = r#"body {
  margin: 0;
  font-family: system-ui, sans-serif;
  color: #1a1a1a;
}

main {
  max-width: 42rem;
  margin: 4rem auto;
  padding: 0 1rem;
}
"#;

/// The default template.
pub const VITE_REACT: ProjectTemplate = ProjectTemplate {
    id: "vite-react",
    compose_file: VITE_REACT_COMPOSE,
    files: &[
        TemplateFile {
            path: "package.json",
            content: VITE_REACT_PACKAGE_JSON,
        },
        TemplateFile {
            path: "vite.config.js",
            content: VITE_REACT_VITE_CONFIG,
        },
        TemplateFile {
            path: "index.html",
            content: VITE_REACT_INDEX_HTML,
        },
        TemplateFile {
            path: "src/main.jsx",
            content: VITE_REACT_MAIN,
        },
        TemplateFile {
            path: "src/App.jsx",
            content: VITE_REACT_APP,
        },
        TemplateFile {
            path: "src/index.css",
            content: VITE_REACT_CSS,
        },
    ],
};

const TEMPLATES: &[&ProjectTemplate] = &[&VITE_REACT];

/// Look up a template by id. Unknown or missing ids fall back to the default.
pub fn template_by_id(id: Option<&str>) -> &'static ProjectTemplate {
    id.and_then(|wanted| TEMPLATES.iter().find(|t| t.id == wanted))
        .copied()
        .unwrap_or(&VITE_REACT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_id_falls_back_to_default() {
        assert_eq!(template_by_id(None).id, "vite-react");
        assert_eq!(template_by_id(Some("vite-react")).id, "vite-react");
        assert_eq!(template_by_id(Some("no-such-template")).id, "vite-react");
    }

    #[test]
    fn default_template_serves_the_preview_port() {
        assert!(VITE_REACT.compose_file.contains("4173"));
        assert!(VITE_REACT
            .files
            .iter()
            .any(|file| file.path == "package.json"));
    }
}
