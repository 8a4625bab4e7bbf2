use crate::error::{Error, Phase};
use crate::manifest::{self, ProxyDefinition};
use crate::mutator::{MutationReport, Mutator};
use crate::program_config::{Command, ConfigCommand, ProgramConfig, StatusFilter};
use crate::public_ip::{HttpEchoClient, PublicIpResolver};
use crate::reconciler::{self, Classification, EndpointStatus};
use crate::security_group::tencent::{TencentCredential, TencentVpcClient};
use crate::security_group;
use crate::settings::{mask_secret, Settings};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything a command needs: command line values take precedence over the settings file.
pub struct Invocation {
    pub options: ProgramConfig,
    pub settings: Settings,
    pub settings_path: PathBuf,
}

struct SecurityGroupHandle {
    security_group_id: String,
    region: String,
    credential: TencentCredential,
}

fn non_empty<T: AsRef<str>>(value: Option<T>) -> Option<T> {
    value.filter(|v| !v.as_ref().trim().is_empty())
}

impl Invocation {
    pub async fn run(self) -> anyhow::Result<()> {
        match &self.options.command {
            Command::List { status } => self.list(*status).await,
            Command::Open { name } => self.open(name).await,
            Command::Close { name } => self.close(name).await,
            Command::Config(command) => self.config(command),
        }
    }

    fn manifest_path(&self) -> Option<&Path> {
        self.options
            .manifest
            .as_deref()
            .or(self.settings.frpc_toml_path.as_deref())
            .filter(|p| !p.as_os_str().is_empty())
    }

    fn security_group_id(&self) -> Option<&str> {
        non_empty(self.options.cloud.security_group_id.as_deref())
            .or(non_empty(self.settings.security_group_id.as_deref()))
    }

    fn region(&self) -> Option<&str> {
        non_empty(self.options.cloud.region.as_deref())
            .or(non_empty(self.settings.region.as_deref()))
    }

    fn load_manifest(&self) -> anyhow::Result<Vec<ProxyDefinition>> {
        let path = self.manifest_path().ok_or(Error::ConfigurationMissing {
            what: "manifest path",
            hint: "--manifest, FRP_SG_MANIFEST or `frp-sg config set-manifest`",
        })?;

        let proxies = manifest::parse_file(path)
            .with_context(|| format!("Failed to load manifest '{}'", path.display()))?;

        if proxies.is_empty() {
            log::warn!("'{}' declares no [[proxies]]", path.display());
        }

        Ok(proxies)
    }

    fn handle(&self) -> Result<SecurityGroupHandle, Error> {
        let security_group_id = self.security_group_id().ok_or(Error::ConfigurationMissing {
            what: "security group id",
            hint: "--security-group-id, FRP_SG_SECURITY_GROUP_ID or `frp-sg config set-security-group`",
        })?;
        let region = self.region().ok_or(Error::ConfigurationMissing {
            what: "region",
            hint: "--region, FRP_SG_REGION or `frp-sg config set-region`",
        })?;
        let secret_id = non_empty(self.options.cloud.secret_id.as_deref()).ok_or(
            Error::ConfigurationMissing {
                what: "SecretId",
                hint: "--secret-id or FRP_SECRET_ID",
            },
        )?;
        let secret_key = non_empty(self.options.cloud.secret_key.as_deref()).ok_or(
            Error::ConfigurationMissing {
                what: "SecretKey",
                hint: "--secret-key or FRP_SECRET_KEY",
            },
        )?;

        Ok(SecurityGroupHandle {
            security_group_id: security_group_id.to_string(),
            region: region.to_string(),
            credential: TencentCredential {
                secret_id: secret_id.to_string(),
                secret_key: secret_key.to_string(),
            },
        })
    }

    fn find_proxy<'m>(
        manifest: &'m [ProxyDefinition],
        name: &str,
    ) -> Result<&'m ProxyDefinition, Error> {
        manifest
            .iter()
            .find(|p| p.name == name && p.is_valid())
            .ok_or_else(|| Error::UnknownEndpoint(name.to_string()))
    }

    fn ip_resolver(&self) -> anyhow::Result<PublicIpResolver> {
        let client = Box::new(HttpEchoClient::new()?);
        let endpoints: Vec<String> = self
            .options
            .ip_endpoints
            .iter()
            .filter(|e| !e.trim().is_empty())
            .cloned()
            .collect();

        Ok(if endpoints.is_empty() {
            PublicIpResolver::with_default_endpoints(client)
        } else {
            PublicIpResolver::new(client, endpoints)
        })
    }

    async fn list(&self, filter: Option<StatusFilter>) -> anyhow::Result<()> {
        let manifest = self.load_manifest()?;
        let handle = self.handle()?;
        let backend = TencentVpcClient::new(handle.credential, handle.region)?;

        let rules = security_group::fetch_rule_map(&backend, &handle.security_group_id)
            .await
            .context("Failed to fetch security group rules")?;

        let classifications: Vec<Classification> = reconciler::classify(&manifest, &rules)
            .into_iter()
            .filter(|c| match filter {
                None => true,
                Some(StatusFilter::Open) => c.status == EndpointStatus::Open,
                Some(StatusFilter::Blocked) => c.status == EndpointStatus::Blocked,
                Some(StatusFilter::Unmanaged) => c.status == EndpointStatus::Unmanaged,
            })
            .collect();

        if self.options.json {
            print_json(&classifications)?;
        } else if classifications.is_empty() {
            println!("No matching proxies");
        } else {
            for classification in &classifications {
                println!("{}", format_classification(classification));
            }
        }

        Ok(())
    }

    async fn open(&self, name: &str) -> anyhow::Result<()> {
        let manifest = self.load_manifest()?;
        let proxy = Self::find_proxy(&manifest, name)?;
        let handle = self.handle()?;
        let backend = TencentVpcClient::new(handle.credential, handle.region)?;
        let resolver = self.ip_resolver()?;

        let report = Mutator::new(&backend, &handle.security_group_id)
            .open(proxy, &resolver)
            .await?;

        self.print_report(&report)
    }

    async fn close(&self, name: &str) -> anyhow::Result<()> {
        let manifest = self.load_manifest()?;
        let proxy = Self::find_proxy(&manifest, name)?;
        let handle = self.handle()?;
        let backend = TencentVpcClient::new(handle.credential, handle.region)?;

        let rules = security_group::fetch_managed_rules(&backend, &handle.security_group_id)
            .await
            .map_err(|e| e.in_phase(name, Phase::FetchRules))?;

        let rule = security_group::find_accept_rule(&rules, name)
            .ok_or_else(|| Error::NotOpen(name.to_string()))?;

        let report = Mutator::new(&backend, &handle.security_group_id)
            .close(proxy, rule)
            .await?;

        self.print_report(&report)
    }

    fn print_report(&self, report: &MutationReport) -> anyhow::Result<()> {
        if self.options.json {
            print_json(report)
        } else {
            println!("{}: {}", report.service, report.detail);
            Ok(())
        }
    }

    fn config(&self, command: &ConfigCommand) -> anyhow::Result<()> {
        let mut settings = self.settings.clone();

        let saved = match command {
            ConfigCommand::View => return self.view_config(),
            ConfigCommand::SetManifest { path } => {
                settings.frpc_toml_path = Some(path.clone());
                format!("Manifest path set to {}", path.display())
            }
            ConfigCommand::SetSecurityGroup { id } => {
                settings.security_group_id = Some(id.clone());
                format!("Security group set to {}", id)
            }
            ConfigCommand::SetRegion { region } => {
                settings.region = Some(region.clone());
                format!("Region set to {}", region)
            }
            ConfigCommand::SetLogFile { path } => {
                settings.log_path = Some(path.clone());
                format!("Log file set to {}", path.display())
            }
        };

        settings.save(&self.settings_path)?;
        log::info!("Saved settings to {}", self.settings_path.display());
        println!("{}", saved);

        Ok(())
    }

    fn view_config(&self) -> anyhow::Result<()> {
        let view = ConfigView {
            settings_file: self.settings_path.clone(),
            manifest: self.manifest_path().map(Path::to_path_buf),
            security_group_id: self.security_group_id().map(str::to_string),
            region: self.region().map(str::to_string),
            secret_id: non_empty(self.options.cloud.secret_id.as_deref()).map(mask_secret),
            secret_key: non_empty(self.options.cloud.secret_key.as_deref()).map(mask_secret),
            log_file: self
                .options
                .log_file
                .clone()
                .or_else(|| self.settings.log_path.clone()),
        };

        if self.options.json {
            return print_json(&view);
        }

        let show = |value: Option<String>| value.unwrap_or_else(|| "(not set)".to_string());
        println!("settings file      {}", view.settings_file.display());
        println!(
            "manifest           {}",
            show(view.manifest.map(|p| p.display().to_string()))
        );
        println!("security group id  {}", show(view.security_group_id));
        println!("region             {}", show(view.region));
        println!("SecretId           {}", show(view.secret_id));
        println!("SecretKey          {}", show(view.secret_key));
        println!(
            "log file           {}",
            show(view.log_file.map(|p| p.display().to_string()))
        );

        Ok(())
    }
}

#[derive(Serialize)]
struct ConfigView {
    settings_file: PathBuf,
    manifest: Option<PathBuf>,
    security_group_id: Option<String>,
    region: Option<String>,
    secret_id: Option<String>,
    secret_key: Option<String>,
    log_file: Option<PathBuf>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_classification(classification: &Classification) -> String {
    let proxy = &classification.proxy;
    let protocol = proxy.protocol.map(|p| p.as_str()).unwrap_or("?");

    let mut line = format!(
        "{:<20} {:<3} remote {:<5} local {:<5} {:<9}",
        proxy.name, protocol, proxy.remote_port, proxy.local_port, classification.status
    );

    if let Some(rule) = &classification.rule {
        line.push_str(&format!(" {}", rule.cidr_block));
        if let Some(modify_time) = &rule.modify_time {
            line.push_str(&format!(" (modified {})", modify_time));
        }
    }

    line.trim_end().to_string()
}
