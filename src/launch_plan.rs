use crate::manifest::BenchId;
use anyhow::Context;
use clap::ValueEnum;

const BENCH_IMAGE_ID: &str = "ami-0b29b6e62f2343b46";
const BENCH_INSTANCE_TYPE: &str = "r5a.4xlarge";

/// Predefined set of machines to provision per cluster. `Basic` is only the
/// benchmark host; `Confluent` also includes a machine running the Kafka,
/// Schema Registry, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Basic,
    Confluent,
}

/// Describes one machine role within a job's cluster. Exists only for the
/// duration of the launch call.
#[derive(Debug, Clone)]
pub struct MachineDescriptor {
    pub name: String,
    pub bootstrap_script: String,
    pub instance_type: String,
    pub image_id: String,
    pub size_gb: i64,
    /// Whether this machine checks out the benchmarked repository at the
    /// job's revision before running its bootstrap script.
    pub checkout: bool,
    /// Support machines that only run containers skip the toolchain setup.
    pub skip_setup: bool,
}

/// Everything the leader's bootstrap script needs to know about its job,
/// threaded in explicitly at construction time. The script self-reports to
/// `{bucket}/{bench_id}/{instance_key}...` without reading any ambient state
/// on the instance.
pub struct BootstrapContext<'a> {
    pub bench_id: &'a BenchId,
    pub instance_key: String,
    pub bucket: &'a str,
    pub entry_module: &'a str,
    pub entry_args: &'a [String],
    pub driver_payload_b64: &'a str,
}

impl BootstrapContext<'_> {
    /// Renders the leader bootstrap script: install the embedded driver into
    /// an isolated environment, run the entry point, upload the result on
    /// success or both captured logs on failure, then shut the machine down
    /// to bound cost.
    pub fn leader_script(&self) -> anyhow::Result<String> {
        let mut quoted_args = vec![];
        for arg in self.entry_args {
            let quoted = shlex::try_quote(arg)
                .with_context(|| format!("Benchmark argument is not quotable: {}", arg))?;
            quoted_args.push(quoted.to_string());
        }
        let entry_args = quoted_args.join(" ");
        let result_prefix = format!("s3://{}/{}/{}", self.bucket, self.bench_id, self.instance_key);

        Ok(format!(
            r#"echo {payload} | base64 -d > driver.tar.gz
tar xzf driver.tar.gz
python3 -m venv /tmp/benchenv >&2
. /tmp/benchenv/bin/activate >&2
python3 -m pip install --upgrade pip >&2
pip3 install ./driver >&2
python3 -u -m {module} {args} > ~/bench-run.out 2> ~/bench-run.err
result=$?
echo $result > ~/bench_exit_code
if [ $result -eq 0 ]; then
    aws s3 cp ~/bench-run.out {prefix}.csv >&2
else
    aws s3 cp ~/bench-run.out {prefix}-FAILURE.out >&2
    aws s3 cp ~/bench-run.err {prefix}-FAILURE.err >&2
fi
sudo shutdown -h now # save some money
"#,
            payload = self.driver_payload_b64,
            module = self.entry_module,
            args = entry_args,
            prefix = result_prefix,
        ))
    }
}

/// Turns a profile into the list of machines to provision for one job. The
/// leader always carries the rendered bootstrap script for this job's
/// instance key.
pub fn build_launch_plan(
    profile: Profile,
    ctx: &BootstrapContext<'_>,
) -> anyhow::Result<Vec<MachineDescriptor>> {
    let leader = MachineDescriptor {
        name: "benchmark".to_string(),
        bootstrap_script: ctx.leader_script()?,
        instance_type: BENCH_INSTANCE_TYPE.to_string(),
        image_id: BENCH_IMAGE_ID.to_string(),
        size_gb: 64,
        checkout: true,
        skip_setup: false,
    };

    let descriptors = match profile {
        Profile::Basic => vec![leader],
        Profile::Confluent => vec![
            leader,
            MachineDescriptor {
                name: "confluent".to_string(),
                bootstrap_script: "docker compose --profile load-tests up -d >&2\n".to_string(),
                instance_type: BENCH_INSTANCE_TYPE.to_string(),
                image_id: BENCH_IMAGE_ID.to_string(),
                size_gb: 1000,
                checkout: false,
                skip_setup: true,
            },
        ],
    };

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    fn ctx<'a>(bench_id: &'a BenchId, args: &'a [String]) -> BootstrapContext<'a> {
        BootstrapContext {
            bench_id,
            instance_key: "0-abc123".to_string(),
            bucket: "mz-cloudbench",
            entry_module: "bench.load",
            entry_args: args,
            driver_payload_b64: "ZHJpdmVy",
        }
    }

    #[test]
    fn leader_script_reports_to_the_instance_key_paths() -> anyhow::Result<()> {
        let bench_id = BenchId::from("bench123");
        let args = vec!["--scale".to_string(), "10".to_string()];
        let script = ctx(&bench_id, &args).leader_script()?;

        assert!(script.contains("s3://mz-cloudbench/bench123/0-abc123.csv"));
        assert!(script.contains("s3://mz-cloudbench/bench123/0-abc123-FAILURE.out"));
        assert!(script.contains("s3://mz-cloudbench/bench123/0-abc123-FAILURE.err"));
        assert!(script.contains("python3 -u -m bench.load --scale 10"));
        assert!(script.contains("shutdown -h now"));

        Ok(())
    }

    #[test]
    fn leader_script_quotes_arguments() -> anyhow::Result<()> {
        let bench_id = BenchId::from("bench123");
        let args = vec!["two words".to_string()];
        let script = ctx(&bench_id, &args).leader_script()?;

        assert!(script.contains("python3 -u -m bench.load 'two words'"));

        Ok(())
    }

    #[test]
    fn basic_profile_is_leader_only() -> anyhow::Result<()> {
        let bench_id = BenchId::from("bench123");
        let descs = build_launch_plan(Profile::Basic, &ctx(&bench_id, &[]))?;

        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].name, "benchmark");
        assert!(descs[0].checkout);
        assert!(!descs[0].skip_setup);

        Ok(())
    }

    #[test]
    fn confluent_profile_adds_a_support_machine() -> anyhow::Result<()> {
        let bench_id = BenchId::from("bench123");
        let descs = build_launch_plan(Profile::Confluent, &ctx(&bench_id, &[]))?;

        assert_eq!(descs.len(), 2);
        assert_eq!(descs[1].name, "confluent");
        assert!(!descs[1].checkout);
        assert!(descs[1].skip_setup);
        assert_eq!(descs[1].size_gb, 1000);

        Ok(())
    }

    #[test]
    fn unknown_profile_names_are_rejected_at_the_cli_boundary() {
        // the profile set is closed, anything else is a configuration error
        assert!(Profile::from_str("basic", true).is_ok());
        assert!(Profile::from_str("confluent", true).is_ok());
        assert!(Profile::from_str("deluxe", true).is_err());
    }
}
