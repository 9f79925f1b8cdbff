//! Kubernetes-backed resource repository

use crate::crd::{Drive, LogicalVolumeGroup};
use crate::domain::ports::{DriveInfo, ResourceRepository, VolumeGroupInfo};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

/// Reads Drive and LogicalVolumeGroup records through the API server
#[derive(Clone)]
pub struct KubeRepository {
    drives: Api<Drive>,
    lvgs: Api<LogicalVolumeGroup>,
}

impl KubeRepository {
    /// Both record kinds are cluster scoped
    pub fn new(client: Client) -> Self {
        Self {
            drives: Api::all(client.clone()),
            lvgs: Api::all(client),
        }
    }

    /// Connect with the in-cluster or kubeconfig credentials
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ResourceRepository for KubeRepository {
    async fn read_drive(&self, name: &str) -> Result<DriveInfo> {
        debug!("reading Drive {}", name);
        match self.drives.get_opt(name).await? {
            Some(drive) => Ok(DriveInfo::from(&drive)),
            None => Err(Error::ResourceNotFound {
                kind: "Drive".to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn find_drive(&self, uuid: &str) -> Result<Option<DriveInfo>> {
        let drives = self
            .drives
            .list(&ListParams::default())
            .await
            .context("unable to list Drives")?;
        Ok(drives
            .items
            .iter()
            .find(|d| d.spec.uuid == uuid)
            .map(DriveInfo::from))
    }

    async fn read_lvg(&self, name: &str) -> Result<VolumeGroupInfo> {
        debug!("reading LogicalVolumeGroup {}", name);
        match self.lvgs.get_opt(name).await? {
            Some(lvg) => Ok(VolumeGroupInfo::from(&lvg)),
            None => Err(Error::ResourceNotFound {
                kind: "LogicalVolumeGroup".to_string(),
                name: name.to_string(),
            }),
        }
    }
}
