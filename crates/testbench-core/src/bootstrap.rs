//! Optional provisioning of the model SDK inside a run's container.

use tracing::{info, warn};

use crate::container::{exec_lossy, shell_quote, ContainerHandle, ExecRequest};
use crate::script;

pub const SDK_INSTALL_FAILED: &str = "Failed to install Claude SDK";

const BUILD_DEPS: [&str; 5] = ["gcc", "musl-dev", "python3-dev", "libffi-dev", "openssl-dev"];
const FALLBACK_SCRIPT_PATH: &str = "/tmp/install_claude.sh";
const VERIFY_IMPORT: &str = "import anthropic";

/// Installs the `anthropic` Python package and exports the API key.
pub struct SdkBootstrap {
    api_key: String,
}

impl SdkBootstrap {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub async fn install(&self, container: &dyn ContainerHandle) -> bool {
        info!("installing model SDK in container");
        exec_lossy(container, ExecRequest::argv(["apk", "update"])).await;
        let mut add = vec!["apk", "add", "--no-cache"];
        add.extend(BUILD_DEPS);
        exec_lossy(container, ExecRequest::argv(add)).await;

        if !self.first_success(container, &["pip", "pip3"], |pip| {
            ExecRequest::argv([pip, "install", "--no-cache-dir", "anthropic"])
        })
        .await
        {
            warn!("pip could not install the SDK");
            return false;
        }

        let export = format!("export ANTHROPIC_API_KEY={}", shell_quote(&self.api_key));
        for profile in ["/root/.profile", "/etc/profile"] {
            exec_lossy(
                container,
                ExecRequest::shell(format!(
                    "echo {} >> {profile}",
                    shell_quote(&export)
                )),
            )
            .await;
        }

        let verified = self
            .first_success(container, &["python", "python3"], |python| {
                ExecRequest::argv([python, "-c", VERIFY_IMPORT])
                    .with_env("ANTHROPIC_API_KEY", self.api_key.clone())
            })
            .await;
        if verified {
            info!("model SDK installed");
            return true;
        }

        warn!("SDK import failed, trying a full reinstall script");
        let reinstall = format!(
            "#!/bin/sh\nset -e\napk update\napk add --no-cache {}\n\
             pip install --no-cache-dir --upgrade pip\n\
             pip install --no-cache-dir anthropic\n\
             python3 -c \"{VERIFY_IMPORT}\"",
            BUILD_DEPS.join(" ")
        );
        script::write_file(container, FALLBACK_SCRIPT_PATH, &reinstall).await;
        let output = script::run(container, FALLBACK_SCRIPT_PATH, "/", Vec::new(), None).await;
        if !output.success() {
            warn!(exit_code = output.exit_code, "SDK reinstall script failed");
        }
        output.success()
    }

    async fn first_success<'a, F>(
        &self,
        container: &dyn ContainerHandle,
        candidates: &[&'a str],
        request: F,
    ) -> bool
    where
        F: Fn(&'a str) -> ExecRequest,
    {
        for candidate in candidates.iter().copied() {
            if exec_lossy(container, request(candidate)).await.success() {
                return true;
            }
        }
        false
    }
}
