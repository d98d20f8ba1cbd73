//! The two-message token exchange that opens every connection.

use super::{AuthError, CredentialTable, Token, TOKEN_LEN};
use crate::stream::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Client half: send a freshly signed `token`, then read and verify the
/// server's reply against the same credential.
///
/// Returns the server's reply token.
pub async fn handshake<S>(stream: &mut S, token: &mut Token) -> Result<Token, AuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    token.refresh()?;
    let request = token.sign();

    stream
        .write_all(&request)
        .await
        .map_err(AuthError::handshake)?;

    let mut reply = [0u8; TOKEN_LEN];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(AuthError::handshake)?;

    let table = CredentialTable::from_credentials([token.credential().clone()], token.scheme());
    Token::decode(&reply, &table).map_err(AuthError::handshake)
}

/// Server half: read and verify a client token, then answer with a freshly
/// salted reply.
///
/// Nothing is written unless the token verifies. The whole exchange is
/// bounded by `ctx`.
pub async fn accept<S>(
    stream: &mut S,
    table: &CredentialTable,
    ctx: &Context,
) -> Result<Token, AuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = [0u8; TOKEN_LEN];
    let read = tokio::select! {
        biased;
        done = ctx.done() => Err(done),
        result = stream.read_exact(&mut request) => Ok(result),
    };
    match read {
        Err(done) => return Err(AuthError::handshake(std::io::Error::from(done))),
        Ok(Err(e)) => return Err(AuthError::handshake(e)),
        Ok(Ok(_)) => {}
    }

    let mut token = Token::decode(&request, table)?;
    token.refresh()?;
    let reply = token.sign();

    let written = tokio::select! {
        biased;
        done = ctx.done() => Err(done),
        result = stream.write_all(&reply) => Ok(result),
    };
    match written {
        Err(done) => Err(AuthError::handshake(std::io::Error::from(done))),
        Ok(Err(e)) => Err(AuthError::handshake(e)),
        Ok(Ok(())) => Ok(token),
    }
}
