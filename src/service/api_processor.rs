use heapless::Vec;

use super::{Lifecycle, Service};
use crate::{Request, Response, ServiceError, constants};

impl Service {
    /// Answer an ask-pattern request from the current state
    pub(crate) fn process_api_request(&self, request: Request) -> Response {
        if matches!(self.lifecycle, Lifecycle::Created | Lifecycle::Stopped) {
            return Response::Error(ServiceError::NotInitialized);
        }

        match request {
            Request::ActiveA2dp => Response::ActiveDevice(
                self.rdm
                    .a2dp_active()
                    .and_then(|h| self.rdm.get(h))
                    .map(|r| r.address()),
            ),
            Request::ActiveHfp => Response::ActiveDevice(
                self.rdm
                    .hfp_active()
                    .and_then(|h| self.rdm.get(h))
                    .map(|r| r.address()),
            ),
            Request::Device(address) => match self.rdm.find(address).and_then(|h| self.rdm.get(h)) {
                Some(record) => Response::Device(record.snapshot()),
                None => Response::Error(ServiceError::NotFound),
            },
            Request::ConnectedDevices => {
                let devices: Vec<_, { constants::MAX_RECORDS }> = self
                    .rdm
                    .iter()
                    .filter(|(_, record)| record.is_connected())
                    .map(|(_, record)| record.snapshot())
                    .collect();
                Response::Devices(devices)
            }
            Request::ScanState => Response::Scan(self.scan_snapshot()),
            Request::SavedVolume(address) => Response::Volume(self.saved_volume(address)),
        }
    }
}
