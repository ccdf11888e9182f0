//! Phase 07: per-service configuration files
//!
//! Inline snippets (database credentials, base URLs, the gateway vhost) and
//! two template files for the frontend image. Each file belongs to one service
//! and is only written when that service's update flag is set.

use async_trait::async_trait;
use deckhand_core::{Outcome, Steps, Vars};
use tracing::{debug, info};

use crate::phases::{customer_root, render_template_file, render_to_file};
use crate::services::Services;
use crate::task::Phase;

struct InlineFile {
    dest: &'static str,
    content: &'static str,
    when: &'static str,
}

struct TemplateFile {
    src: &'static str,
    dest: &'static str,
    when: &'static str,
}

const INLINE_MODE: u32 = 0o644;
const TEMPLATE_MODE: u32 = 0o777;

const INLINE_FILES: [InlineFile; 7] = [
    InlineFile {
        dest: "portal-frontend/baseUrl.js",
        content: "const baseUrl = 'https://{{ customer_subdomain_backendportal }}.{{ customer_domain }}';\nexport default baseUrl;",
        when: "customer_portal_frontend_update",
    },
    InlineFile {
        dest: "portal/.env.local",
        content: concat!(
            "DATABASE_URL=\"mysql://{{ portal_mysql_user }}:{{ portal_mysql_password }}",
            "@{{ inventory_hostname }}-portal-db:3306/{{ portal_mysql_db_name }}",
            "?serverVersion=10.11.2-MariaDB&charset=utf8mb4\"\n",
            "BASE_URL=\"https://{{ customer_subdomain_gateway }}.{{ customer_domain }}\"",
        ),
        when: "customer_portal_update",
    },
    InlineFile {
        dest: "gateway/admin/application/config/my_database.php",
        content: r#"<?php defined('BASEPATH') OR exit('No direct script access allowed');
$active_group = 'default'; $query_builder = TRUE;
$db['default'] = array(
  'dsn'       => '',
  'hostname'  => '{{ inventory_hostname }}-gateway-db',
  'username'  => '{{ gateway_mysql_user }}',
  'password'  => '{{ gateway_mysql_password }}',
  'database'  => '{{ gateway_mysql_db_name }}',
  'dbdriver'  => 'mysqli',
  'dbprefix'  => '',
  'pconnect'  => FALSE,
  'db_debug'  => (ENVIRONMENT !== 'production'),
  'cache_on'  => FALSE,
  'cachedir'  => '',
  'char_set'  => 'utf8',
  'dbcollat'  => 'utf8_general_ci',
  'swap_pre'  => '',
  'encrypt'   => FALSE,
  'compress'  => FALSE,
  'stricton'  => FALSE,
  'failover'  => array(),
  'save_queries' => TRUE
);"#,
        when: "customer_gateway_update",
    },
    InlineFile {
        dest: "gateway/admin/application/config/my_config.php",
        content: r#"<?php
defined('BASEPATH') OR exit('No direct script access allowed');
$config['base_url'] = "http://localhost:{{ customer_gateway_ports }}";
$config['websocket_container_name'] = '{{ inventory_hostname }}-socketio-server';
$config['websocket_container_port'] = '{{ customer_websocket_ports }}';
$config['microservice_registery'] = [
    "lms" => "'{{ inventory_hostname }}-lms",
    "file" => "'{{ inventory_hostname }}-lms",
];"#,
        when: "customer_gateway_update",
    },
    InlineFile {
        dest: "gateway/docker/app.conf",
        content: r#"<VirtualHost *:80>
    ServerName localhost
    DocumentRoot /var/www/html
    <Directory /var/www/html>
        AllowOverride All
        Require all granted
    </Directory>
    RewriteEngine On
    RewriteCond %{HTTP:Upgrade} websocket [NC]
    RewriteCond %{HTTP:Connection} upgrade [NC]
    RewriteRule ^/socket\.io/(.*) ws://{{ inventory_hostname }}-socketio-server:{{ customer_websocket_ports }}/socket.io/$1 [P,L]
    ProxyPass /socket.io http://{{ inventory_hostname }}-socketio-server:{{ customer_websocket_ports }}/socket.io
    ProxyPassReverse /socket.io http://{{ inventory_hostname }}-socketio-server:{{ customer_websocket_ports }}/socket.io
    ProxyPass /socketio-ping http://{{ inventory_hostname }}-socketio-server:{{ customer_websocket_ports }}/
    ProxyPassReverse /socketio-ping http://{{ inventory_hostname }}-socketio-server:{{ customer_websocket_ports }}/
</VirtualHost>"#,
        when: "customer_gateway_update",
    },
    InlineFile {
        dest: "lms/.env.local",
        content: "DB_CONNECTION=mysql
DB_HOST={{ inventory_hostname }}-lms-database
DB_PORT=3306
DB_DATABASE={{ lms_mysql_db_name }}
DB_USERNAME={{ lms_mysql_user }}
DB_PASSWORD={{ lms_mysql_password }}",
        when: "customer_lms_update",
    },
    InlineFile {
        dest: "file/.env.local",
        content: "DB_CONNECTION=mysql
DB_HOST={{ inventory_hostname }}-file-storage-database
DB_PORT=3306
DB_DATABASE={{ file_mysql_db_name }}
DB_USERNAME={{ file_mysql_user }}
DB_PASSWORD={{ file_mysql_password }}
CACHE_DRIVER=file
FILESYSTEM_DISK=private",
        when: "customer_file_update",
    },
];

const TEMPLATE_FILES: [TemplateFile; 2] = [
    TemplateFile {
        src: "nginx.conf.j2",
        dest: "portal-frontend/docker/nginx.conf",
        when: "customer_portal_frontend_update",
    },
    TemplateFile {
        src: "Dockerfile.j2",
        dest: "portal-frontend/docker/Dockerfile",
        when: "customer_portal_frontend_update",
    },
];

/// Deploys configuration files for flagged services
pub struct ConfigFilesPhase;

#[async_trait]
impl Phase for ConfigFilesPhase {
    fn name(&self) -> &'static str {
        "task_07_config_files"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["config", "services"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let root = customer_root(vars);
        let mut steps = Steps::new();
        let mut deployed = 0;

        for file in &INLINE_FILES {
            if !vars.get_bool(file.when) {
                debug!("Skipping {} ({} is false)", file.dest, file.when);
                continue;
            }
            let outcome = render_to_file(services, file.content, &root.join(file.dest), vars, INLINE_MODE, true);
            if outcome.is_changed() {
                deployed += 1;
            }
            steps.record(file.dest, outcome);
        }

        let templates = services.config.templates_dir();
        for file in &TEMPLATE_FILES {
            if !vars.get_bool(file.when) {
                continue;
            }
            let outcome = render_template_file(
                services,
                &templates.join(file.src),
                &root.join(file.dest),
                vars,
                TEMPLATE_MODE,
                true,
            );
            if outcome.is_changed() {
                deployed += 1;
            }
            steps.record(file.dest, outcome);
        }

        if steps.is_empty() {
            return Outcome::skipped("No config files selected (update flags are false)");
        }

        info!("Deployed {} of {} config files", deployed, steps.len());
        let total = steps.len();
        steps
            .finish(format!("Deployed {} config files", deployed))
            .with("deployed_count", deployed)
            .with("total_files", total)
    }
}
