//! Pure string composition for container-runtime commands. No I/O happens here;
//! every function takes already-validated inputs and returns a shell command string
//! meant for either the local or a remote executor.

use std::collections::BTreeMap;

fn flag_pairs(flag: &str, pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{} {}={:?}", flag, k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn secret_ids(secrets: &BTreeMap<String, String>) -> String {
    secrets
        .keys()
        .map(|k| format!("--secret id={}", k))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn pull_image(image: &str) -> String {
    format!("docker pull {}", image)
}

pub fn tag_image(image: &str, target: &str) -> String {
    format!("docker tag {} {}", image, target)
}

pub fn push_image(image: &str) -> String {
    format!("docker push {}", image)
}

/// A single `docker buildx build --push` invocation covering tagging, secrets, and
/// build args in one step, mirroring a multi-platform-capable builder.
pub fn build_and_push_image(
    image: &str,
    dockerfile: &str,
    platform: &str,
    builder: &str,
    secrets: &BTreeMap<String, String>,
    build_args: &BTreeMap<String, String>,
) -> String {
    let mut cmd = format!(
        "docker buildx build --push --builder {} -t {} --platform {}",
        builder, image, platform
    );
    let secrets_part = secret_ids(secrets);
    if !secrets_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&secrets_part);
    }
    let args_part = flag_pairs("--build-arg", build_args);
    if !args_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&args_part);
    }
    cmd.push(' ');
    cmd.push_str(dockerfile);
    cmd
}

pub fn list_builders(builder: &str) -> String {
    format!("docker buildx ls | grep {}", builder)
}

pub fn create_builder(builder: &str, driver: &str, platform: &str) -> String {
    format!(
        "docker buildx create --name {} --driver {} --platform {} --use",
        builder, driver, platform
    )
}

pub fn start_container(name: &str) -> String {
    format!("docker start {}", name)
}

/// Idempotent: a container that's already gone is not an error on rollback paths.
pub fn stop_container(name: &str) -> String {
    format!("docker stop {} || true", name)
}

pub fn run_container(
    image: &str,
    name: &str,
    env: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> String {
    let mut cmd = format!("docker run -d --name {} --restart unless-stopped", name);
    let env_part = flag_pairs("--env", env);
    if !env_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&env_part);
    }
    let labels_part = flag_pairs("--label", labels);
    if !labels_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&labels_part);
    }
    cmd.push(' ');
    cmd.push_str(image);
    cmd
}

pub fn list_running_containers() -> String {
    "docker ps".to_string()
}

pub fn list_all_containers() -> String {
    "docker ps -a".to_string()
}

pub fn container_logs(name: &str, follow: bool, lines: Option<u32>, since: Option<&str>) -> String {
    let mut cmd = format!("docker logs {}", name);
    if let Some(since) = since {
        cmd.push_str(&format!(" --since {}", since));
    }
    if let Some(lines) = lines {
        cmd.push_str(&format!(" --tail {}", lines));
    }
    if follow {
        cmd.push_str(" --follow");
    }
    cmd
}

pub fn registry_login(server: &str, user: &str, password: &str) -> String {
    format!(
        "echo {:?} | docker login {} --username {} --password-stdin",
        password, server, user
    )
}

pub fn registry_logout(server: &str) -> String {
    format!("docker logout {}", server)
}

pub fn exec_in_container(name: &str, cmd: &str, interactive: bool) -> String {
    if interactive {
        format!("docker exec -it {} {}", name, cmd)
    } else {
        format!("docker exec {} {}", name, cmd)
    }
}

pub fn start_proxy(
    image: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
    args: &BTreeMap<String, String>,
) -> String {
    let mut cmd = format!(
        "docker run -d -p 80:80 -p 443:443 --name {} --volume /var/run/docker.sock:/var/run/docker.sock:ro",
        name
    );
    let labels_part = flag_pairs("--label", labels);
    if !labels_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&labels_part);
    }
    cmd.push(' ');
    cmd.push_str(image);
    let args_part = flag_pairs("--", args);
    if !args_part.is_empty() {
        cmd.push(' ');
        cmd.push_str(&args_part.replace("-- ", "--"));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn run_container_includes_labels_and_env_in_sorted_order() {
        let env = map(&[("B", "2"), ("A", "1")]);
        let labels = map(&[("y", "2"), ("x", "1")]);
        let cmd = run_container("svc:v1", "svc-v1", &env, &labels);
        assert!(cmd.contains("--env A=\"1\" --env B=\"2\""));
        assert!(cmd.contains("--label x=\"1\" --label y=\"2\""));
        assert!(cmd.ends_with("svc:v1"));
    }

    #[test]
    fn stop_container_tolerates_missing_container() {
        assert!(stop_container("svc-v1").ends_with("|| true"));
    }

    #[test]
    fn container_logs_builds_since_tail_follow() {
        let cmd = container_logs("svc-v1", true, Some(100), Some("10m"));
        assert_eq!(cmd, "docker logs svc-v1 --since 10m --tail 100 --follow");
    }

    #[test]
    fn exec_in_container_adds_it_flag_when_interactive() {
        assert_eq!(
            exec_in_container("svc-v1", "bash", true),
            "docker exec -it svc-v1 bash"
        );
        assert_eq!(
            exec_in_container("svc-v1", "bash", false),
            "docker exec svc-v1 bash"
        );
    }

    #[test]
    fn build_and_push_image_includes_secrets_and_build_args() {
        let secrets = map(&[("npm_token", "x")]);
        let args = map(&[("VERSION", "1.2.3")]);
        let cmd = build_and_push_image("svc:v1", ".", "linux/amd64,linux/arm64", "hybrid", &secrets, &args);
        assert!(cmd.contains("--secret id=npm_token"));
        assert!(cmd.contains("--build-arg VERSION=\"1.2.3\""));
        assert!(cmd.ends_with('.'));
    }
}
