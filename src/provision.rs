use crate::{config::LaunchParams, launch_plan::MachineDescriptor};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rusoto_core::Region;
use rusoto_ec2::{
    BlockDeviceMapping, EbsBlockDevice, Ec2, Ec2Client, IamInstanceProfileSpecification,
    RunInstancesRequest, Tag, TagSpecification,
};
use tracing::info;

/// One machine the provisioner actually started, kept for display and
/// diagnostics. Collection never consults this, it relies on the manifest
/// alone.
#[derive(Debug, Clone)]
pub struct LaunchedInstance {
    pub instance_id: String,
    pub machine_name: String,
    pub instance_type: String,
    pub revision: String,
    pub nonce: String,
}

/// A single job's machine set plus everything needed to tag and expire it.
pub struct ClusterRequest<'a> {
    pub descriptors: &'a [MachineDescriptor],
    pub nonce: String,
    pub tags: Vec<(String, String)>,
    pub expiry: DateTime<Utc>,
    pub revision: String,
}

/// Provisions machine sets. Failure means the job never started; the fleet
/// launcher treats that as fatal and does not retry.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn launch_cluster(
        &self,
        request: ClusterRequest<'_>,
    ) -> anyhow::Result<Vec<LaunchedInstance>>;
}

/// Provisioner backed by EC2 on-demand instances.
pub struct Ec2Provisioner {
    client: Ec2Client,
    params: LaunchParams,
}

impl Ec2Provisioner {
    pub fn from_env(params: LaunchParams) -> Self {
        Ec2Provisioner {
            client: Ec2Client::new(Region::default()),
            params,
        }
    }

    /// Composes the final user data: a setup preamble (toolchain install,
    /// repository checkout at the job's revision) followed by the machine's
    /// bootstrap script.
    fn user_data(&self, desc: &MachineDescriptor, revision: &str) -> String {
        let mut script = String::from("#!/bin/bash\nset -ux\ncd /home/ubuntu\n");
        if !desc.skip_setup {
            script.push_str(
                "export DEBIAN_FRONTEND=noninteractive\n\
                 apt-get update -qq >&2\n\
                 apt-get install -y -qq git python3 python3-venv python3-pip awscli >&2\n",
            );
        }
        if desc.checkout {
            script.push_str(&format!(
                "git clone {} repo >&2\ncd repo\ngit checkout {} >&2\ncd /home/ubuntu\n",
                self.params.repo_url, revision,
            ));
        }
        script.push_str(&desc.bootstrap_script);
        script
    }
}

#[async_trait]
impl Provisioner for Ec2Provisioner {
    async fn launch_cluster(
        &self,
        request: ClusterRequest<'_>,
    ) -> anyhow::Result<Vec<LaunchedInstance>> {
        let mut launched = vec![];

        for desc in request.descriptors {
            let mut tags = vec![
                Tag {
                    key: Some("Name".to_string()),
                    value: Some(format!("{}-{}", desc.name, request.nonce)),
                },
                Tag {
                    key: Some("delete_after".to_string()),
                    value: Some(request.expiry.to_rfc3339()),
                },
            ];
            for (key, value) in &request.tags {
                tags.push(Tag {
                    key: Some(key.clone()),
                    value: Some(value.clone()),
                });
            }

            let run_request = RunInstancesRequest {
                image_id: Some(desc.image_id.clone()),
                instance_type: Some(desc.instance_type.clone()),
                min_count: 1,
                max_count: 1,
                subnet_id: Some(self.params.subnet_id.clone()),
                security_group_ids: Some(vec![self.params.security_group_id.clone()]),
                iam_instance_profile: Some(IamInstanceProfileSpecification {
                    name: Some(self.params.instance_profile.clone()),
                    ..Default::default()
                }),
                key_name: self.params.key_name.clone(),
                user_data: Some(STANDARD.encode(self.user_data(desc, &request.revision))),
                // the bootstrap script ends in a shutdown, make it final
                instance_initiated_shutdown_behavior: Some("terminate".to_string()),
                block_device_mappings: Some(vec![BlockDeviceMapping {
                    device_name: Some("/dev/sda1".to_string()),
                    ebs: Some(EbsBlockDevice {
                        volume_size: Some(desc.size_gb),
                        volume_type: Some("gp3".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                tag_specifications: Some(vec![TagSpecification {
                    resource_type: Some("instance".to_string()),
                    tags: Some(tags),
                }]),
                ..Default::default()
            };

            let reservation = self
                .client
                .run_instances(run_request)
                .await
                .with_context(|| {
                    format!("Failed to launch machine {} for {}", desc.name, request.nonce)
                })?;

            for instance in reservation.instances.unwrap_or_default() {
                let instance_id = instance
                    .instance_id
                    .context("EC2 returned an instance without an id")?;
                info!("launched {} as {}", desc.name, instance_id);
                launched.push(LaunchedInstance {
                    instance_id,
                    machine_name: desc.name.clone(),
                    instance_type: desc.instance_type.clone(),
                    revision: request.revision.clone(),
                    nonce: request.nonce.clone(),
                });
            }
        }

        Ok(launched)
    }
}
