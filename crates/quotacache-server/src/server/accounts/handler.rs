use crate::server::{accounts::directory::AccountDirectory, dispatch::Dispatch};
use quotacache_core::proto::{GetByTokenReq, GetByTokenResp, accounts_server::Accounts};
use std::sync::Arc;
use tonic::{Request, Response, Status};

const GET_BY_TOKEN: &str = "/quotacache.Accounts/GetByToken";

/// gRPC front of the [`AccountDirectory`].
#[derive(Clone)]
pub struct AccountsService {
    directory: Arc<AccountDirectory>,
    dispatch: Dispatch,
}

impl AccountsService {
    pub fn new(directory: Arc<AccountDirectory>, dispatch: Dispatch) -> Self {
        Self {
            directory,
            dispatch,
        }
    }
}

#[tonic::async_trait]
impl Accounts for AccountsService {
    async fn get_by_token(
        &self,
        req: Request<GetByTokenReq>,
    ) -> Result<Response<GetByTokenResp>, Status> {
        self.dispatch
            .unary(GET_BY_TOKEN, req, |req| async move {
                let account = self.directory.get_by_token(&req.get_ref().token)?;
                Ok(GetByTokenResp {
                    account: Some(account),
                })
            })
            .await
    }
}
