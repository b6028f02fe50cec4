use crate::connection::UriPresenter;
use crate::core::config::WalletConfig;
use crate::utils::wallet_deep_link;

/// Prints pairing URIs and optionally opens the desktop wallet on them.
pub struct TerminalPresenter {
    wallet: WalletConfig,
    open: bool,
}

impl TerminalPresenter {
    pub fn new(wallet: WalletConfig, open: bool) -> Self {
        Self { wallet, open }
    }
}

impl UriPresenter for TerminalPresenter {
    fn present(&self, uri: &str) -> anyhow::Result<()> {
        let link = wallet_deep_link(&self.wallet.deep_link_base, uri)?;

        println!("\n🔗 Pair with your wallet using this URI:");
        println!("   {}", uri);

        if self.open || self.wallet.open_on_connect {
            println!("\n🔄 Opening Syrius...");
            if let Err(e) = open::that(&link) {
                println!("⚠️  Could not open the wallet: {}", e);
                println!("💡 Paste the URI into Syrius manually");
            }
        } else {
            println!("💡 Or open: {}", link);
        }
        println!("\n⏳ Waiting for approval in the wallet...");
        Ok(())
    }

    fn dismiss(&self) {
        tracing::debug!("Pairing prompt dismissed");
    }
}
