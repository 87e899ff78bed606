use crate::ftp::FtpInterface;
use crate::sftp::SftpInterface;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use xfer_core::{
    AdapterOptions, FileSystemAdapter, FileSystemInterface, FsError, FsResult, FtpOptions, FtpProtocol,
    LastRequestSession,
};

/// One configured FTP, FTPS or SFTP server. Every interface owns its own
/// connection.
pub struct FtpAdapter {
    options: AdapterOptions,
    ftp: FtpOptions,
    session: LastRequestSession,
}

impl FtpAdapter {
    pub fn new(options: FtpOptions) -> FsResult<Self> {
        if options.host().is_empty() {
            return Err(FsError::invalid_config(format!("'{}': FTP url must name a host", options.identifier)));
        }
        Ok(Self {
            options: AdapterOptions::Ftp(options.clone()),
            ftp: options,
            session: LastRequestSession::new(),
        })
    }

    pub fn protocol(&self) -> FtpProtocol {
        self.ftp.protocol
    }
}

#[async_trait]
impl FileSystemAdapter for FtpAdapter {
    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn create_interface(&self) -> FsResult<Arc<dyn FileSystemInterface>> {
        debug!(
            "{}: opening {:?} session to {}:{}",
            self.identifier(),
            self.ftp.protocol,
            self.ftp.host(),
            self.ftp.effective_port()
        );
        let interface: Arc<dyn FileSystemInterface> = match self.ftp.protocol {
            FtpProtocol::Sftp => Arc::new(SftpInterface::connect(self.identifier(), self.ftp.clone()).await?),
            _ => Arc::new(FtpInterface::connect(self.identifier(), self.ftp.clone()).await?),
        };
        Ok(interface)
    }

    fn last_request_session(&self) -> &LastRequestSession {
        &self.session
    }
}
