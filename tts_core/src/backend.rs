use async_trait::async_trait;

use crate::catalog::{Backend, VariantSpec};
use crate::model::{ModelHandle, ModelLoader};
use crate::remote::RemoteLoader;

/// Routes each catalog entry to the loader for its backend.
pub struct BackendLoader {
    remote: RemoteLoader,
    #[cfg(feature = "piper")]
    piper: crate::piper::PiperLoader,
}

impl BackendLoader {
    pub fn new(remote: RemoteLoader) -> Self {
        Self {
            remote,
            #[cfg(feature = "piper")]
            piper: crate::piper::PiperLoader,
        }
    }
}

#[async_trait]
impl ModelLoader for BackendLoader {
    async fn load(&self, spec: &VariantSpec) -> anyhow::Result<ModelHandle> {
        match spec.backend {
            Backend::Remote => self.remote.load(spec).await,
            #[cfg(feature = "piper")]
            Backend::Piper => self.piper.load(spec).await,
            #[cfg(not(feature = "piper"))]
            Backend::Piper => anyhow::bail!(
                "variant '{}' uses the piper backend, which this build does not include (enable the `piper` feature)",
                spec.key
            ),
        }
    }
}

#[cfg(all(test, not(feature = "piper")))]
mod tests {
    use super::*;
    use crate::catalog::ModelFamily;

    #[tokio::test]
    async fn test_piper_entry_without_feature() {
        let loader = BackendLoader::new(RemoteLoader::new("http://127.0.0.1:1", None).unwrap());
        let spec = VariantSpec {
            key: "piper_en".into(),
            path: "/voices/en.onnx.json".into(),
            family: ModelFamily::CustomVoice,
            backend: Backend::Piper,
        };
        let err = loader.load(&spec).await.err().unwrap();
        assert!(err.to_string().contains("piper"));
    }
}
